//! Cart model.
//!
//! A cart is owned by exactly one [`Owner`]. Anonymous carts expire after a
//! period of inactivity; user carts never expire.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use guardline_core::{LineQuantity, Money, Owner, ProductId};

/// A line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product on this line (live reference).
    pub product_id: ProductId,
    /// Requested quantity.
    pub quantity: LineQuantity,
    /// Effective unit price when the line was last added or updated.
    pub unit_price: Money,
}

impl CartItem {
    /// Snapshot price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity.get())
    }
}

/// A shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Who the cart belongs to.
    pub owner: Owner,
    /// Lines in insertion order; at most one line per product.
    pub items: Vec<CartItem>,
    /// Coupon applied to the cart, normalized.
    pub coupon_code: Option<String>,
    /// Discount computed when the coupon was applied.
    pub discount_amount: Money,
    /// When the cart was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// Anonymous carts only: when the cart stops being usable.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Create an empty cart for `owner`.
    #[must_use]
    pub fn new(owner: Owner, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = owner.is_anonymous().then(|| now + ttl);
        Self {
            owner,
            items: Vec::new(),
            coupon_code: None,
            discount_amount: Money::ZERO,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    /// Whether the cart has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Quantity currently on the line for `product_id`.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> Option<LineQuantity> {
        self.items
            .iter()
            .find(|i| i.product_id == product_id)
            .map(|i| i.quantity)
    }

    /// Record activity, pushing the expiry forward for anonymous carts.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        if self.owner.is_anonymous() {
            self.expires_at = Some(now + ttl);
        }
    }

    /// Add `quantity` of a product.
    ///
    /// An existing line is summed and clamped to the maximum, never replaced.
    /// The unit price snapshot is refreshed. Returns the resulting quantity.
    pub fn add(
        &mut self,
        product_id: ProductId,
        quantity: LineQuantity,
        unit_price: Money,
    ) -> LineQuantity {
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = item.quantity.merge(quantity);
            item.unit_price = unit_price;
            return item.quantity;
        }
        self.items.push(CartItem {
            product_id,
            quantity,
            unit_price,
        });
        quantity
    }

    /// Replace the quantity on an existing line. Returns `false` if absent.
    pub fn set_quantity(
        &mut self,
        product_id: ProductId,
        quantity: LineQuantity,
        unit_price: Money,
    ) -> bool {
        match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(item) => {
                item.quantity = quantity;
                item.unit_price = unit_price;
                true
            }
            None => false,
        }
    }

    /// Remove a line. Returns `false` if absent.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    /// Fold another cart's lines into this one using the add rule.
    ///
    /// Lines for the same product are summed and clamped; this cart's coupon
    /// wins over the other's.
    pub fn absorb(&mut self, other: Self) {
        for item in other.items {
            self.add(item.product_id, item.quantity, item.unit_price);
        }
        if self.coupon_code.is_none() {
            self.coupon_code = other.coupon_code;
            self.discount_amount = other.discount_amount;
        }
    }
}
