//! In-memory implementation of every repository.
//!
//! Each conditional write (stock reservation, coupon usage, order
//! compare-and-set) happens under a single write lock, which gives the same
//! guarantee as the conditional `UPDATE` statements of the `PostgreSQL`
//! repositories.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use guardline_core::{
    CouponId, OrderId, OrderStatus, Owner, ProductId, ProductStatus, SessionToken, UserId,
};

use super::{
    CartRepository, CouponRepository, OrderRepository, ProductRepository, RepositoryError,
};
use crate::models::{Cart, Coupon, NewOrder, Order, PaymentChange, Product, StatusChange};

/// Repositories backed by process memory. Used by tests and local runs
/// without a database.
#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<ProductId, Product>>,
    carts: RwLock<HashMap<Owner, Cart>>,
    coupons: RwLock<HashMap<CouponId, Coupon>>,
    orders: RwLock<BTreeMap<OrderId, Order>>,
    fail_on_order_insert: RwLock<bool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a product.
    pub async fn put_product(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    /// Add or replace a coupon.
    pub async fn put_coupon(&self, coupon: Coupon) {
        self.coupons.write().await.insert(coupon.id, coupon);
    }

    /// Current state of a product.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.products.read().await.get(&id).cloned()
    }

    /// Current state of a coupon.
    pub async fn coupon(&self, id: CouponId) -> Option<Coupon> {
        self.coupons.read().await.get(&id).cloned()
    }

    /// Number of carts held, expired ones included.
    pub async fn cart_count(&self) -> usize {
        self.carts.read().await.len()
    }

    /// Number of orders held.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Make subsequent order inserts fail, to exercise compensation paths.
    pub async fn set_fail_on_order_insert(&self, fail: bool) {
        *self.fail_on_order_insert.write().await = fail;
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }

    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError> {
        let mut products = self.products.write().await;
        let Some(product) = products.get_mut(&id) else {
            return Ok(None);
        };
        if product.status != ProductStatus::Active || product.stock < quantity {
            return Ok(None);
        }

        product.stock -= quantity;
        product.total_sold = product.total_sold.saturating_add(quantity);
        if product.stock == 0 {
            product.status = ProductStatus::OutOfStock;
        }
        product.updated_at = Utc::now();
        Ok(Some(product.clone()))
    }

    async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError> {
        let mut products = self.products.write().await;
        let Some(product) = products.get_mut(&id) else {
            return Ok(None);
        };

        product.stock = product.stock.saturating_add(quantity);
        product.total_sold = product.total_sold.saturating_sub(quantity);
        if product.status == ProductStatus::OutOfStock && product.stock > 0 {
            product.status = ProductStatus::Active;
        }
        product.updated_at = Utc::now();
        Ok(Some(product.clone()))
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn get(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.carts.read().await.get(owner).cloned())
    }

    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError> {
        let mut carts = self.carts.write().await;
        // Keep the original creation time on overwrite, as the upsert does.
        let created_at = carts
            .get(&cart.owner)
            .map_or(cart.created_at, |existing| existing.created_at);
        let mut stored = cart.clone();
        stored.created_at = created_at;
        carts.insert(cart.owner.clone(), stored);
        Ok(())
    }

    async fn delete(&self, owner: &Owner) -> Result<bool, RepositoryError> {
        Ok(self.carts.write().await.remove(owner).is_some())
    }

    async fn take(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.carts.write().await.remove(owner))
    }

    async fn reassign(
        &self,
        session: &SessionToken,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut carts = self.carts.write().await;
        let user_owner = Owner::User(user);
        if carts.contains_key(&user_owner) {
            return Ok(false);
        }
        let Some(mut cart) = carts.remove(&Owner::Session(session.clone())) else {
            return Ok(false);
        };

        cart.owner = user_owner.clone();
        cart.expires_at = None;
        cart.updated_at = now;
        carts.insert(user_owner, cart);
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut carts = self.carts.write().await;
        let before = carts.len();
        carts.retain(|_, cart| !cart.is_expired(now));
        Ok(u64::try_from(before - carts.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        Ok(self
            .coupons
            .read()
            .await
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn increment_usage(&self, id: CouponId) -> Result<bool, RepositoryError> {
        let mut coupons = self.coupons.write().await;
        let Some(coupon) = coupons.get_mut(&id) else {
            return Ok(false);
        };
        if coupon
            .usage_limit
            .is_some_and(|limit| coupon.usage_count >= limit)
        {
            return Ok(false);
        }
        coupon.usage_count += 1;
        Ok(true)
    }

    async fn decrement_usage(&self, id: CouponId) -> Result<(), RepositoryError> {
        if let Some(coupon) = self.coupons.write().await.get_mut(&id) {
            coupon.usage_count = coupon.usage_count.saturating_sub(1);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        if *self.fail_on_order_insert.read().await {
            return Err(RepositoryError::DataCorruption(
                "order insert disabled".to_owned(),
            ));
        }

        let mut orders = self.orders.write().await;
        if orders
            .values()
            .any(|existing| existing.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }

        let next = orders.keys().next_back().map_or(1, |id| id.as_i32() + 1);
        let order = order.into_order(OrderId::new(next));
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list_for_owner(&self, owner: &Owner) -> Result<Vec<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .rev()
            .filter(|o| &o.owner == owner)
            .cloned()
            .collect())
    }

    async fn find_by_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn set_payment_intent(
        &self,
        id: OrderId,
        intent_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        order.payment_intent_id = Some(intent_id.to_owned());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<bool, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if order.status != change.from() {
            return Ok(false);
        }
        order.apply(change.clone());
        Ok(true)
    }

    async fn record_payment(
        &self,
        id: OrderId,
        change: &PaymentChange,
    ) -> Result<bool, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if order.is_paid || order.status != change.from() {
            return Ok(false);
        }
        order.apply_payment(change.clone());
        Ok(true)
    }

    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == OrderStatus::Pending && !o.is_paid && o.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use guardline_core::Money;

    use super::*;

    fn product(id: i32, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            sku: format!("SKU-{id}"),
            image_url: None,
            price: Money::from_cents(1000),
            sale_price: None,
            sale_window: None,
            stock,
            low_stock_threshold: 2,
            status: ProductStatus::Active,
            total_sold: 0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reserve_is_conditional() {
        let store = MemoryStore::new();
        store.put_product(product(1, 5)).await;
        let id = ProductId::new(1);

        assert!(store.reserve_stock(id, 6).await.unwrap().is_none());
        let p = store.reserve_stock(id, 5).await.unwrap().unwrap();
        assert_eq!(p.stock, 0);
        assert_eq!(p.total_sold, 5);
        assert_eq!(p.status, ProductStatus::OutOfStock);

        // Out of stock products cannot be reserved even for zero shortfall.
        assert!(store.reserve_stock(id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_restores_active_only_from_out_of_stock() {
        let store = MemoryStore::new();
        let mut p = product(1, 0);
        p.status = ProductStatus::Discontinued;
        p.total_sold = 1;
        store.put_product(p).await;

        let released = store
            .release_stock(ProductId::new(1), 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released.stock, 3);
        assert_eq!(released.total_sold, 0);
        assert_eq!(released.status, ProductStatus::Discontinued);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        store.put_product(product(1, 5)).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.reserve_stock(ProductId::new(1), 1).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }

        assert_eq!(granted, 5);
        assert_eq!(store.product(ProductId::new(1)).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_reassign_requires_free_user_slot() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let token = SessionToken::parse("anon-1").unwrap();
        let session_cart = Cart::new(Owner::Session(token.clone()), now, Duration::days(7));
        store.save(&session_cart).await.unwrap();

        assert!(store.reassign(&token, UserId::new(1), now).await.unwrap());
        let cart = CartRepository::get(&store, &Owner::User(UserId::new(1)))
            .await
            .unwrap()
            .unwrap();
        assert!(cart.expires_at.is_none());

        // Second attempt finds no session cart.
        assert!(!store.reassign(&token, UserId::new(1), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = Cart::new(
            Owner::Session(SessionToken::parse("old").unwrap()),
            now - Duration::days(8),
            Duration::days(7),
        );
        let fresh = Cart::new(
            Owner::Session(SessionToken::parse("fresh").unwrap()),
            now,
            Duration::days(7),
        );
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();
        store
            .save(&Cart::new(Owner::User(UserId::new(1)), now, Duration::days(7)))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert_eq!(store.cart_count().await, 2);
    }
}
