//! Orders: the immutable checkout snapshot and its status lifecycle.
//!
//! [`Order::plan_transition`] is the only way to obtain a [`StatusChange`],
//! and [`Order::apply`] is the only code that mutates `status`,
//! `status_history`, `is_delivered` or `delivered_at`. Repositories persist a
//! planned change with a compare-and-set on the `from` status.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use guardline_core::{
    Actor, CouponId, LineQuantity, Money, OrderId, OrderStatus, Owner, PaymentMethod, ProductId,
    ShippingInfo,
};

use super::Product;

// =============================================================================
// Pricing
// =============================================================================

/// Store-wide pricing rules applied at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingRules {
    /// Shipping charged below the free-shipping threshold.
    pub flat_shipping: Money,
    /// Items price at or above which shipping is free.
    pub free_shipping_threshold: Money,
    /// Tax rate applied to the discounted items price (`0.08` = 8%).
    pub tax_rate: Decimal,
}

impl PricingRules {
    /// Compute order totals for an items price and an already-capped discount.
    #[must_use]
    pub fn price(&self, items_price: Money, discount_amount: Money) -> OrderTotals {
        let discount_amount = discount_amount.min(items_price);
        let shipping_price = if items_price >= self.free_shipping_threshold {
            Money::ZERO
        } else {
            self.flat_shipping
        };
        let tax_price = (items_price - discount_amount).apply_rate(self.tax_rate);
        let total_price = items_price + shipping_price + tax_price - discount_amount;

        OrderTotals {
            items_price,
            shipping_price,
            tax_price,
            discount_amount,
            total_price,
        }
    }
}

/// Money breakdown of an order.
///
/// `total_price == items_price + shipping_price + tax_price - discount_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub items_price: Money,
    pub shipping_price: Money,
    pub tax_price: Money,
    pub discount_amount: Money,
    pub total_price: Money,
}

// =============================================================================
// Items
// =============================================================================

/// A validated checkout line, priced from the authoritative product record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub unit_price: Money,
    pub quantity: LineQuantity,
}

impl OrderLine {
    /// Price a line from the product as it stands at `now`.
    #[must_use]
    pub fn from_product(product: &Product, quantity: LineQuantity, now: DateTime<Utc>) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            image_url: product.image_url.clone(),
            unit_price: product.effective_price(now),
            quantity,
        }
    }
}

/// An item on a placed order. Display and pricing fields are copied so later
/// catalog changes never alter historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub price: Money,
    pub quantity: LineQuantity,
    pub subtotal: Money,
}

impl From<OrderLine> for OrderItem {
    fn from(line: OrderLine) -> Self {
        Self {
            subtotal: line.unit_price.times(line.quantity.get()),
            product_id: line.product_id,
            name: line.name,
            sku: line.sku,
            image_url: line.image_url,
            price: line.unit_price,
            quantity: line.quantity,
        }
    }
}

// =============================================================================
// History and payment records
// =============================================================================

/// One entry of the append-only status audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: String,
    pub actor: Actor,
}

/// What the payment gateway reported for a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Gateway payment intent id.
    pub gateway_id: String,
    /// Gateway status string (e.g. `succeeded`).
    pub status: String,
    /// Amount received, in minor units.
    pub amount_minor: i64,
    /// When the gateway reported the payment.
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Order
// =============================================================================

/// Generate a human-facing order number: `GL-YYYYMMDD-XXXXXX`.
#[must_use]
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("GL-{}-{suffix}", now.format("%Y%m%d"))
}

/// An order ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub owner: Owner,
    pub items: Vec<OrderItem>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub coupon: Option<(CouponId, String)>,
    pub totals: OrderTotals,
    pub created: StatusEntry,
}

impl NewOrder {
    /// Build the order snapshot from priced lines.
    ///
    /// `discount_amount` must already be the coupon engine's output for the
    /// items price of `lines`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        owner: Owner,
        lines: Vec<OrderLine>,
        shipping: ShippingInfo,
        payment_method: PaymentMethod,
        coupon: Option<(CouponId, String)>,
        discount_amount: Money,
        rules: &PricingRules,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Self {
        let items: Vec<OrderItem> = lines.into_iter().map(OrderItem::from).collect();
        let items_price: Money = items.iter().map(|i| i.subtotal).sum();
        let totals = rules.price(items_price, discount_amount);

        Self {
            order_number: generate_order_number(now),
            owner,
            items,
            shipping,
            payment_method,
            coupon,
            totals,
            created: StatusEntry {
                status: OrderStatus::Pending,
                at: now,
                note: "order created".to_string(),
                actor,
            },
        }
    }

    /// Materialize the order as stored under `id`.
    #[must_use]
    pub fn into_order(self, id: OrderId) -> Order {
        let now = self.created.at;
        Order {
            id,
            order_number: self.order_number,
            owner: self.owner,
            items: self.items,
            shipping: self.shipping,
            payment_method: self.payment_method,
            coupon_code: self.coupon.map(|(_, code)| code),
            totals: self.totals,
            status: OrderStatus::Pending,
            status_history: vec![self.created],
            is_paid: false,
            paid_at: None,
            payment_intent_id: None,
            payment_result: None,
            is_delivered: false,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub owner: Owner,
    pub items: Vec<OrderItem>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub totals: OrderTotals,
    pub status: OrderStatus,
    pub status_history: Vec<StatusEntry>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_intent_id: Option<String>,
    pub payment_result: Option<PaymentResult>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a status change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The transition table does not allow `from -> to`.
    #[error("cannot move order from {from} to {to}")]
    Illegal { from: OrderStatus, to: OrderStatus },
    /// Refund requested for an order that was never paid.
    #[error("order has not been paid")]
    NotPaid,
    /// Payment already recorded.
    #[error("order is already paid")]
    AlreadyPaid,
}

/// A validated status transition, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    from: OrderStatus,
    entry: StatusEntry,
    delivered_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    /// Status the order must still be in for the change to apply.
    #[must_use]
    pub const fn from(&self) -> OrderStatus {
        self.from
    }

    /// Target status.
    #[must_use]
    pub const fn to(&self) -> OrderStatus {
        self.entry.status
    }

    /// History entry to append.
    #[must_use]
    pub const fn entry(&self) -> &StatusEntry {
        &self.entry
    }

    /// Delivery stamp, set only when moving to `delivered`.
    #[must_use]
    pub const fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }
}

/// A validated first payment, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChange {
    from: OrderStatus,
    result: PaymentResult,
    paid_at: DateTime<Utc>,
    status_change: Option<StatusChange>,
}

impl PaymentChange {
    /// Status the order must still be in, unpaid, for the payment to apply.
    #[must_use]
    pub const fn from(&self) -> OrderStatus {
        self.from
    }

    /// Gateway record to store.
    #[must_use]
    pub const fn result(&self) -> &PaymentResult {
        &self.result
    }

    /// Paid-at stamp.
    #[must_use]
    pub const fn paid_at(&self) -> DateTime<Utc> {
        self.paid_at
    }

    /// The `pending -> confirmed` transition, if the order was pending.
    #[must_use]
    pub const fn status_change(&self) -> Option<&StatusChange> {
        self.status_change.as_ref()
    }
}

impl Order {
    /// Validate a move to `to` and describe it.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Illegal`] when the transition table refuses
    /// the move and [`TransitionError::NotPaid`] for a refund of an unpaid
    /// order.
    pub fn plan_transition(
        &self,
        to: OrderStatus,
        note: impl Into<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        if to == OrderStatus::Refunded && !self.is_paid {
            return Err(TransitionError::NotPaid);
        }

        Ok(StatusChange {
            from: self.status,
            entry: StatusEntry {
                status: to,
                at: now,
                note: note.into(),
                actor,
            },
            delivered_at: (to == OrderStatus::Delivered).then_some(now),
        })
    }

    /// Apply a planned transition to this in-memory copy.
    pub fn apply(&mut self, change: StatusChange) {
        self.status = change.entry.status;
        self.updated_at = change.entry.at;
        if let Some(at) = change.delivered_at {
            self.is_delivered = true;
            self.delivered_at = Some(at);
        }
        self.status_history.push(change.entry);
    }

    /// Validate a first payment and describe its effect.
    ///
    /// A pending order moves to `confirmed`; an order already further along
    /// (e.g. cash on delivery being settled) keeps its status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyPaid`] if payment was recorded
    /// before, and [`TransitionError::Illegal`] for cancelled or refunded
    /// orders.
    pub fn plan_payment(
        &self,
        result: PaymentResult,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<PaymentChange, TransitionError> {
        if self.is_paid {
            return Err(TransitionError::AlreadyPaid);
        }
        let status_change = match self.status {
            OrderStatus::Pending => Some(self.plan_transition(
                OrderStatus::Confirmed,
                "payment received",
                actor,
                now,
            )?),
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                return Err(TransitionError::Illegal {
                    from: self.status,
                    to: OrderStatus::Confirmed,
                });
            }
            _ => None,
        };

        Ok(PaymentChange {
            from: self.status,
            result,
            paid_at: now,
            status_change,
        })
    }

    /// Apply a planned payment to this in-memory copy.
    pub fn apply_payment(&mut self, change: PaymentChange) {
        self.is_paid = true;
        self.paid_at = Some(change.paid_at);
        self.payment_result = Some(change.result);
        self.updated_at = change.paid_at;
        if let Some(status_change) = change.status_change {
            self.apply(status_change);
        }
    }

    /// Whether `actor` may read or cancel this order.
    #[must_use]
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        actor.may_act_for(&self.owner)
    }
}
