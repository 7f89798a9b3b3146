//! Cart store: per-owner line items, coupons and login merge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use guardline_core::{LineQuantity, Money, Owner, ProductId, ProductStatus, SessionToken, UserId};

use super::coupons::CouponEngine;
use crate::db::{CartRepository, ProductRepository};
use crate::error::{AppError, ConflictKind, Result};
use crate::models::{Cart, Product};

/// A cart line as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLineView {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub unit_price: Money,
    pub quantity: LineQuantity,
    pub line_total: Money,
}

/// The priced cart returned by every cart operation.
///
/// `items` holds only lines whose product is still purchasable; the others
/// stay in the stored cart and are listed in `unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub unavailable: Vec<ProductId>,
    pub subtotal: Money,
    pub coupon_code: Option<String>,
    pub discount_amount: Money,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CartView {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            unavailable: Vec::new(),
            subtotal: Money::ZERO,
            coupon_code: None,
            discount_amount: Money::ZERO,
            expires_at: None,
        }
    }

    /// Total number of units on valid lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity.get()).sum()
    }
}

#[derive(Clone)]
pub struct CartStore {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
    coupons: CouponEngine,
    ttl: Duration,
}

impl CartStore {
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        products: Arc<dyn ProductRepository>,
        coupons: CouponEngine,
        ttl: Duration,
    ) -> Self {
        Self {
            carts,
            products,
            coupons,
            ttl,
        }
    }

    /// Load the owner's cart, treating an expired one as absent.
    async fn load(&self, owner: &Owner, now: DateTime<Utc>) -> Result<Option<Cart>> {
        Ok(self
            .carts
            .get(owner)
            .await?
            .filter(|cart| !cart.is_expired(now)))
    }

    async fn load_or_new(&self, owner: &Owner, now: DateTime<Utc>) -> Result<Cart> {
        Ok(self
            .load(owner, now)
            .await?
            .unwrap_or_else(|| Cart::new(owner.clone(), now, self.ttl)))
    }

    async fn load_existing(&self, owner: &Owner, now: DateTime<Utc>) -> Result<Cart> {
        self.load(owner, now)
            .await?
            .ok_or_else(|| AppError::NotFound("cart".to_string()))
    }

    async fn purchasable_product(&self, product_id: ProductId) -> Result<Product> {
        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;
        if product.status != ProductStatus::Active {
            return Err(ConflictKind::ProductUnavailable { product_id }.into());
        }
        Ok(product)
    }

    fn ensure_stock(product: &Product, quantity: LineQuantity) -> Result<()> {
        if product.stock < quantity.get() {
            return Err(ConflictKind::InsufficientStock {
                product_id: product.id,
                requested: quantity.get(),
                available: product.stock,
            }
            .into());
        }
        Ok(())
    }

    async fn save_and_view(&self, mut cart: Cart, now: DateTime<Utc>) -> Result<CartView> {
        cart.touch(now, self.ttl);
        self.carts.save(&cart).await?;
        self.view(&cart, now).await
    }

    /// Price a cart against live product state.
    async fn view(&self, cart: &Cart, now: DateTime<Utc>) -> Result<CartView> {
        let ids: Vec<ProductId> = cart.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<ProductId, Product> = self
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut items = Vec::with_capacity(cart.items.len());
        let mut unavailable = Vec::new();
        for item in &cart.items {
            match products.get(&item.product_id) {
                Some(p) if p.is_purchasable() => items.push(CartLineView {
                    product_id: item.product_id,
                    name: p.name.clone(),
                    sku: p.sku.clone(),
                    image_url: p.image_url.clone(),
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total(),
                }),
                _ => unavailable.push(item.product_id),
            }
        }
        let subtotal: Money = items.iter().map(|i| i.line_total).sum();

        let discount_amount = match &cart.coupon_code {
            Some(code) if !items.is_empty() => {
                match self.coupons.validate(code, subtotal, now).await {
                    Ok(applied) => applied.discount_amount,
                    Err(e) => {
                        debug!(%code, error = %e, "Stored coupon no longer applies");
                        Money::ZERO
                    }
                }
            }
            _ => Money::ZERO,
        };

        Ok(CartView {
            items,
            unavailable,
            subtotal,
            coupon_code: cart.coupon_code.clone(),
            discount_amount,
            expires_at: cart.expires_at,
        })
    }

    /// The owner's cart, priced. An absent or expired cart is empty.
    ///
    /// # Errors
    ///
    /// Returns `Database` if loading fails.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn get(&self, owner: &Owner) -> Result<CartView> {
        let now = Utc::now();
        match self.load(owner, now).await? {
            Some(cart) => self.view(&cart, now).await,
            None => Ok(CartView::empty()),
        }
    }

    /// Add `quantity` units of a product, summing with an existing line and
    /// clamping to the line maximum.
    ///
    /// # Errors
    ///
    /// - `Validation` if `quantity` is outside `1..=10`
    /// - `NotFound` if the product does not exist
    /// - `Conflict` if the product is not active, or if stock cannot cover the
    ///   resulting line quantity (existing line plus `quantity`, clamped), not
    ///   only the increment
    #[instrument(skip(self), fields(owner = %owner, product_id = %product_id, quantity))]
    pub async fn add_item(
        &self,
        owner: &Owner,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartView> {
        let quantity = LineQuantity::new(quantity)?;
        let product = self.purchasable_product(product_id).await?;
        let now = Utc::now();
        let mut cart = self.load_or_new(owner, now).await?;

        let resulting = cart
            .quantity_of(product_id)
            .map_or(quantity, |existing| existing.merge(quantity));
        Self::ensure_stock(&product, resulting)?;

        cart.add(product_id, quantity, product.effective_price(now));
        debug!(line_quantity = resulting.get(), "Added to cart");
        self.save_and_view(cart, now).await
    }

    /// Replace the quantity of a line.
    ///
    /// # Errors
    ///
    /// - `Validation` if `quantity` is outside `1..=10` (use
    ///   [`remove_item`](Self::remove_item) to drop a line)
    /// - `NotFound` if the cart, the line or the product does not exist
    /// - `Conflict` if the product is not active or stock is short
    #[instrument(skip(self), fields(owner = %owner, product_id = %product_id, quantity))]
    pub async fn update_quantity(
        &self,
        owner: &Owner,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartView> {
        let quantity = LineQuantity::new(quantity)?;
        let now = Utc::now();
        let mut cart = self.load_existing(owner, now).await?;
        if cart.quantity_of(product_id).is_none() {
            return Err(AppError::NotFound(format!("cart item {product_id}")));
        }

        let product = self.purchasable_product(product_id).await?;
        Self::ensure_stock(&product, quantity)?;

        cart.set_quantity(product_id, quantity, product.effective_price(now));
        self.save_and_view(cart, now).await
    }

    /// Drop a line.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the cart or the line does not exist.
    #[instrument(skip(self), fields(owner = %owner, product_id = %product_id))]
    pub async fn remove_item(&self, owner: &Owner, product_id: ProductId) -> Result<CartView> {
        let now = Utc::now();
        let mut cart = self.load_existing(owner, now).await?;
        if !cart.remove(product_id) {
            return Err(AppError::NotFound(format!("cart item {product_id}")));
        }
        self.save_and_view(cart, now).await
    }

    /// Delete the owner's cart. Clearing an absent cart is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the delete fails.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &Owner) -> Result<()> {
        self.carts.delete(owner).await?;
        Ok(())
    }

    /// Attach a coupon to the cart after pricing it against the valid lines.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no cart or no such coupon
    /// - `Validation` if the cart has no purchasable lines, the coupon is not
    ///   usable, or the subtotal is below the coupon's minimum
    /// - `Conflict(CouponExhausted)` if the usage limit is reached
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn apply_coupon(&self, owner: &Owner, code: &str) -> Result<CartView> {
        let now = Utc::now();
        let mut cart = self.load_existing(owner, now).await?;
        let priced = self.view(&cart, now).await?;
        if priced.items.is_empty() {
            return Err(AppError::Validation("cart is empty".to_string()));
        }

        let applied = self.coupons.validate(code, priced.subtotal, now).await?;
        if !applied.is_applicable() {
            return Err(AppError::Validation(format!(
                "cart subtotal does not meet the minimum for coupon {}",
                applied.code
            )));
        }

        cart.coupon_code = Some(applied.code);
        cart.discount_amount = applied.discount_amount;
        self.save_and_view(cart, now).await
    }

    /// Detach the cart's coupon.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no cart.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_coupon(&self, owner: &Owner) -> Result<CartView> {
        let now = Utc::now();
        let mut cart = self.load_existing(owner, now).await?;
        cart.coupon_code = None;
        cart.discount_amount = Money::ZERO;
        self.save_and_view(cart, now).await
    }

    /// Fold an anonymous session cart into the user's cart at login.
    ///
    /// If the user has no cart the session cart is re-owned as a whole.
    /// Otherwise each session line is added to the user cart with the usual
    /// sum-and-clamp rule and the session cart is deleted. Repeating the
    /// merge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Database` if any read or write fails.
    #[instrument(skip(self, session), fields(user_id = %user))]
    pub async fn merge_on_login(&self, session: &SessionToken, user: UserId) -> Result<CartView> {
        let now = Utc::now();
        let session_owner = Owner::Session(session.clone());
        let user_owner = Owner::User(user);

        let Some(session_cart) = self.carts.get(&session_owner).await? else {
            return self.get(&user_owner).await;
        };
        if session_cart.is_expired(now) || session_cart.is_empty() {
            self.carts.delete(&session_owner).await?;
            return self.get(&user_owner).await;
        }

        if self.carts.reassign(session, user, now).await? {
            info!(lines = session_cart.items.len(), "Session cart re-owned at login");
            return self.get(&user_owner).await;
        }

        // Only lines removed by this call are folded; a concurrent merge of the
        // same session finds nothing left to take.
        let Some(session_cart) = self.carts.take(&session_owner).await? else {
            return self.get(&user_owner).await;
        };
        let lines = session_cart.items.len();
        let mut user_cart = match self.load(&user_owner, now).await? {
            Some(mut user_cart) => {
                user_cart.absorb(session_cart);
                user_cart
            }
            None => {
                let mut cart = session_cart;
                cart.owner = Owner::User(user);
                cart.expires_at = None;
                cart
            }
        };
        user_cart.touch(now, self.ttl);
        self.carts.save(&user_cart).await?;
        info!(lines, "Session cart merged into user cart");

        self.view(&user_cart, now).await
    }

    /// Delete expired anonymous carts.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the delete fails.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = self.carts.purge_expired(now).await?;
        if purged > 0 {
            info!(purged, "Purged expired carts");
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, RepositoryError};

    fn product(id: i32, stock: u32, cents: i64) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            sku: format!("SKU-{id}"),
            image_url: None,
            price: Money::from_cents(cents),
            sale_price: None,
            sale_window: None,
            stock,
            low_stock_threshold: 1,
            status: ProductStatus::Active,
            total_sold: 0,
            updated_at: Utc::now(),
        }
    }

    async fn store_with(products: Vec<Product>) -> (CartStore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for p in products {
            store.put_product(p).await;
        }
        let carts = CartStore::new(
            store.clone(),
            store.clone(),
            CouponEngine::new(store.clone()),
            Duration::days(7),
        );
        (carts, store)
    }

    fn session(token: &str) -> Owner {
        Owner::Session(SessionToken::parse(token).unwrap())
    }

    #[tokio::test]
    async fn test_add_item_sums_and_clamps() {
        let (carts, _) = store_with(vec![product(1, 50, 1000)]).await;
        let owner = Owner::User(UserId::new(1));

        carts.add_item(&owner, ProductId::new(1), 9).await.unwrap();
        let view = carts.add_item(&owner, ProductId::new(1), 4).await.unwrap();

        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity.get(), 10);
        assert_eq!(view.subtotal, Money::from_cents(10_000));
    }

    #[tokio::test]
    async fn test_add_item_rejects_bad_quantity_and_short_stock() {
        let (carts, store) = store_with(vec![product(1, 3, 1000)]).await;
        let owner = session("sess-abc");

        let err = carts.add_item(&owner, ProductId::new(1), 0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = carts.add_item(&owner, ProductId::new(1), 11).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        carts.add_item(&owner, ProductId::new(1), 2).await.unwrap();
        let err = carts.add_item(&owner, ProductId::new(1), 2).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict(ConflictKind::InsufficientStock { requested: 4, .. })
        ));
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_add_inactive_product_is_conflict() {
        let mut p = product(1, 5, 1000);
        p.status = ProductStatus::Discontinued;
        let (carts, store) = store_with(vec![p]).await;

        let err = carts
            .add_item(&session("sess-abc"), ProductId::new(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Conflict(ConflictKind::ProductUnavailable { .. })
        ));
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_hides_unavailable_lines_without_deleting() {
        let (carts, store) = store_with(vec![product(1, 5, 1000), product(2, 5, 500)]).await;
        let owner = Owner::User(UserId::new(3));
        carts.add_item(&owner, ProductId::new(1), 1).await.unwrap();
        carts.add_item(&owner, ProductId::new(2), 2).await.unwrap();

        let mut gone = product(2, 5, 500);
        gone.status = ProductStatus::Inactive;
        store.put_product(gone).await;

        let view = carts.get(&owner).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.unavailable, vec![ProductId::new(2)]);
        assert_eq!(view.subtotal, Money::from_cents(1000));

        let stored = CartRepository::get(store.as_ref(), &owner).await.unwrap().unwrap();
        assert_eq!(stored.items.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (carts, _) = store_with(vec![product(1, 5, 1000)]).await;
        let owner = Owner::User(UserId::new(1));

        let err = carts
            .update_quantity(&owner, ProductId::new(1), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        carts.add_item(&owner, ProductId::new(1), 1).await.unwrap();
        let view = carts.update_quantity(&owner, ProductId::new(1), 3).await.unwrap();
        assert_eq!(view.item_count(), 3);

        let err = carts
            .update_quantity(&owner, ProductId::new(1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let view = carts.remove_item(&owner, ProductId::new(1)).await.unwrap();
        assert!(view.items.is_empty());
        assert!(carts.remove_item(&owner, ProductId::new(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_merge_reowns_when_user_has_no_cart() {
        let (carts, store) = store_with(vec![product(1, 20, 1000)]).await;
        let token = SessionToken::parse("sess-merge").unwrap();
        carts
            .add_item(&Owner::Session(token.clone()), ProductId::new(1), 2)
            .await
            .unwrap();

        let view = carts.merge_on_login(&token, UserId::new(5)).await.unwrap();
        assert_eq!(view.item_count(), 2);
        assert!(view.expires_at.is_none());
        assert_eq!(store.cart_count().await, 1);

        let again = carts.merge_on_login(&token, UserId::new(5)).await.unwrap();
        assert_eq!(again.item_count(), 2);
    }

    #[tokio::test]
    async fn test_merge_folds_into_existing_user_cart() {
        let (carts, store) = store_with(vec![product(1, 20, 1000), product(2, 20, 300)]).await;
        let token = SessionToken::parse("sess-fold").unwrap();
        let user = Owner::User(UserId::new(8));

        carts.add_item(&user, ProductId::new(1), 9).await.unwrap();
        let anon = Owner::Session(token.clone());
        carts.add_item(&anon, ProductId::new(1), 4).await.unwrap();
        carts.add_item(&anon, ProductId::new(2), 1).await.unwrap();

        let view = carts.merge_on_login(&token, UserId::new(8)).await.unwrap();
        let p1 = view
            .items
            .iter()
            .find(|i| i.product_id == ProductId::new(1))
            .unwrap();
        assert_eq!(p1.quantity.get(), 10);
        assert_eq!(view.item_count(), 11);
        assert_eq!(store.cart_count().await, 1);
    }

    /// Cart storage where another login folds the session cart into the user
    /// cart right after this merge has read it.
    struct FoldedElsewhere {
        inner: Arc<MemoryStore>,
    }

    #[async_trait::async_trait]
    impl CartRepository for FoldedElsewhere {
        async fn get(&self, owner: &Owner) -> std::result::Result<Option<Cart>, RepositoryError> {
            CartRepository::get(&*self.inner, owner).await
        }

        async fn save(&self, cart: &Cart) -> std::result::Result<(), RepositoryError> {
            self.inner.save(cart).await
        }

        async fn delete(&self, owner: &Owner) -> std::result::Result<bool, RepositoryError> {
            self.inner.delete(owner).await
        }

        async fn take(&self, owner: &Owner) -> std::result::Result<Option<Cart>, RepositoryError> {
            self.inner.take(owner).await
        }

        async fn reassign(
            &self,
            session: &SessionToken,
            user: UserId,
            now: DateTime<Utc>,
        ) -> std::result::Result<bool, RepositoryError> {
            let user_owner = Owner::User(user);
            let session_cart = self
                .inner
                .take(&Owner::Session(session.clone()))
                .await?
                .unwrap();
            let mut user_cart = CartRepository::get(&*self.inner, &user_owner).await?.unwrap();
            user_cart.absorb(session_cart);
            self.inner.save(&user_cart).await?;
            self.inner.reassign(session, user, now).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<u64, RepositoryError> {
            self.inner.purge_expired(now).await
        }
    }

    #[tokio::test]
    async fn test_merge_after_concurrent_fold_adds_nothing() {
        let (carts, store) = store_with(vec![product(1, 20, 1000)]).await;
        let token = SessionToken::parse("sess-twice").unwrap();
        let user = Owner::User(UserId::new(9));
        carts.add_item(&user, ProductId::new(1), 2).await.unwrap();
        carts
            .add_item(&Owner::Session(token.clone()), ProductId::new(1), 3)
            .await
            .unwrap();

        let racing = CartStore::new(
            Arc::new(FoldedElsewhere {
                inner: store.clone(),
            }),
            store.clone(),
            CouponEngine::new(store.clone()),
            Duration::days(7),
        );
        let view = racing.merge_on_login(&token, UserId::new(9)).await.unwrap();

        assert_eq!(view.item_count(), 5);
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_cart_is_absent() {
        let (carts, store) = store_with(vec![product(1, 20, 1000)]).await;
        let owner = session("sess-old");
        let past = Utc::now() - Duration::days(10);
        let mut cart = Cart::new(owner.clone(), past, Duration::days(7));
        cart.add(ProductId::new(1), LineQuantity::new(1).unwrap(), Money::from_cents(1000));
        store.save(&cart).await.unwrap();

        let view = carts.get(&owner).await.unwrap();
        assert!(view.items.is_empty());

        assert_eq!(carts.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.cart_count().await, 0);
    }
}
