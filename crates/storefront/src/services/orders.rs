//! Order orchestrator: checkout and the order status lifecycle.
//!
//! Checkout is a saga over independent conditional writes. Each step that
//! commits something (stock, coupon usage) is undone by the orchestrator
//! itself if a later step fails, so a failed checkout leaves no trace.
//!
//! ```text
//! validate shipping -> load cart -> load products -> price coupon
//!   -> reserve stock (all or nothing)
//!   -> count coupon use        (undo: release stock)
//!   -> insert order            (undo: release stock, give back coupon use)
//!   -> delete cart             (failure is logged only)
//!   -> notify
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use guardline_core::{
    Actor, Money, OrderId, OrderStatus, Owner, PaymentMethod, ProductId, ProductStatus,
    ShippingInfo,
};

use super::coupons::{AppliedCoupon, CouponEngine};
use super::inventory::{InventoryLedger, Reservation};
use super::notifications::{NotificationDispatcher, OrderEvent};
use crate::db::{CartRepository, OrderRepository, ProductRepository};
use crate::error::{AppError, ConflictKind, Result, add_breadcrumb};
use crate::models::{Cart, NewOrder, Order, OrderLine, PricingRules, Product};

/// Checkout input.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    /// Overrides the coupon stored on the cart.
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct OrderOrchestrator {
    orders: Arc<dyn OrderRepository>,
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
    ledger: InventoryLedger,
    coupons: CouponEngine,
    pricing: PricingRules,
    pending_ttl: Duration,
    notifications: NotificationDispatcher,
}

impl OrderOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: Arc<dyn CartRepository>,
        products: Arc<dyn ProductRepository>,
        ledger: InventoryLedger,
        coupons: CouponEngine,
        pricing: PricingRules,
        pending_ttl: Duration,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            orders,
            carts,
            products,
            ledger,
            coupons,
            pricing,
            pending_ttl,
            notifications,
        }
    }

    /// Turn the owner's cart into a pending order.
    ///
    /// Stock is re-read and prices are re-snapshotted here; the cart's own
    /// price snapshot is not trusted.
    ///
    /// # Errors
    ///
    /// - `Validation` for bad shipping details, an empty cart, or an explicit
    ///   coupon that is unusable or below its minimum
    /// - `NotFound` for a product or coupon that no longer exists
    /// - `Conflict` for unavailable products, short stock or an exhausted
    ///   coupon
    /// - `Database` if persisting fails
    ///
    /// On any error no stock stays reserved and no coupon use stays counted.
    #[instrument(skip(self, request), fields(owner = %owner, payment_method = ?request.payment_method))]
    pub async fn create_order(&self, owner: &Owner, request: CheckoutRequest) -> Result<Order> {
        request.shipping.validate()?;
        let now = Utc::now();

        let cart = self
            .carts
            .get(owner)
            .await?
            .filter(|c| !c.is_expired(now) && !c.is_empty())
            .ok_or_else(|| AppError::Validation("cart is empty".to_string()))?;

        let lines = self.snapshot_lines(&cart, now).await?;
        let items_price: Money = lines.iter().map(|l| l.unit_price.times(l.quantity.get())).sum();
        let coupon = self
            .resolve_coupon(request.coupon_code.as_deref(), &cart, items_price, now)
            .await?;

        let wanted: Vec<Reservation> = lines
            .iter()
            .map(|l| Reservation {
                product_id: l.product_id,
                quantity: l.quantity.get(),
            })
            .collect();
        let reserved = self.ledger.reserve_all(&wanted).await?;
        add_breadcrumb("checkout", "Stock reserved", None);

        if let Some(applied) = &coupon
            && let Err(e) = self.coupons.increment_usage(applied).await
        {
            self.ledger.release_all(&reserved).await;
            return Err(e);
        }

        let actor = Actor::Customer(owner.clone());
        let discount_amount = coupon.as_ref().map_or(Money::ZERO, |c| c.discount_amount);
        let new_order = NewOrder::build(
            owner.clone(),
            lines,
            request.shipping,
            request.payment_method,
            coupon.as_ref().map(|c| (c.coupon_id, c.code.clone())),
            discount_amount,
            &self.pricing,
            actor,
            now,
        );

        let order = match self.orders.insert(new_order).await {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Failed to persist order, compensating");
                self.ledger.release_all(&reserved).await;
                if let Some(applied) = &coupon
                    && let Err(undo) = self.coupons.release_usage(applied).await
                {
                    error!(code = %applied.code, error = %undo, "Failed to give back coupon use");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.carts.delete(owner).await {
            warn!(order_id = %order.id, error = %e, "Order placed but cart could not be cleared");
        }

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.totals.total_price,
            "Order created"
        );
        self.notifications.dispatch(OrderEvent::created(&order));
        Ok(order)
    }

    /// Re-read every cart product and snapshot its current price.
    async fn snapshot_lines(&self, cart: &Cart, now: DateTime<Utc>) -> Result<Vec<OrderLine>> {
        let ids: Vec<ProductId> = cart.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<ProductId, Product> = self
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        cart.items
            .iter()
            .map(|item| {
                let product = products
                    .get(&item.product_id)
                    .ok_or_else(|| AppError::NotFound(format!("product {}", item.product_id)))?;
                if matches!(
                    product.status,
                    ProductStatus::Inactive | ProductStatus::Discontinued
                ) {
                    return Err(ConflictKind::ProductUnavailable {
                        product_id: product.id,
                    }
                    .into());
                }
                Ok(OrderLine::from_product(product, item.quantity, now))
            })
            .collect()
    }

    /// Pick and price the coupon for checkout.
    ///
    /// An explicit code must apply. A code stored on the cart that no longer
    /// applies is dropped instead of failing the checkout.
    async fn resolve_coupon(
        &self,
        explicit: Option<&str>,
        cart: &Cart,
        items_price: Money,
        now: DateTime<Utc>,
    ) -> Result<Option<AppliedCoupon>> {
        if let Some(code) = explicit {
            let applied = self.coupons.validate(code, items_price, now).await?;
            if !applied.is_applicable() {
                return Err(AppError::Validation(format!(
                    "order does not meet the minimum for coupon {}",
                    applied.code
                )));
            }
            return Ok(Some(applied));
        }

        let Some(stored) = cart.coupon_code.as_deref() else {
            return Ok(None);
        };
        match self.coupons.validate(stored, items_price, now).await {
            Ok(applied) if applied.is_applicable() => Ok(Some(applied)),
            Ok(_) => {
                info!(code = %stored, "Cart coupon below minimum, not applied");
                Ok(None)
            }
            Err(e @ (AppError::Database(_) | AppError::Internal(_))) => Err(e),
            Err(e) => {
                info!(code = %stored, reason = %e, "Cart coupon no longer valid, not applied");
                Ok(None)
            }
        }
    }

    /// Load an order the actor may see.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist and `Unauthorized` if
    /// the actor neither owns it nor is privileged.
    #[instrument(skip(self), fields(order_id = %id, actor = %actor))]
    pub async fn get_order(&self, id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.load(id).await?;
        if !order.is_visible_to(actor) {
            return Err(AppError::Unauthorized(format!(
                "order {id} belongs to another customer"
            )));
        }
        Ok(order)
    }

    /// Orders placed by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` if loading fails.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list_orders(&self, owner: &Owner) -> Result<Vec<Order>> {
        Ok(self.orders.list_for_owner(owner).await?)
    }

    async fn load(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }

    /// Move an order along its lifecycle.
    ///
    /// Fulfillment moves and refunds are for admins and the system; a
    /// request to cancel is routed through [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// - `NotFound` if the order does not exist
    /// - `Unauthorized` if a customer attempts anything but a cancel
    /// - `Conflict` for an illegal transition, a refund of an unpaid order,
    ///   or a concurrent change
    #[instrument(skip(self, note), fields(order_id = %id, to = %to, actor = %actor))]
    pub async fn update_status(
        &self,
        id: OrderId,
        to: OrderStatus,
        note: Option<String>,
        actor: &Actor,
    ) -> Result<Order> {
        if to == OrderStatus::Cancelled {
            return self.cancel(id, actor, note).await;
        }
        if !actor.is_privileged() {
            return Err(AppError::Unauthorized(
                "only staff can change order status".to_string(),
            ));
        }

        let mut order = self.load(id).await?;
        let from = order.status;
        let note = note.unwrap_or_else(|| format!("status changed to {to}"));
        let change = order.plan_transition(to, note, actor.clone(), Utc::now())?;

        if !self.orders.apply_transition(id, &change).await? {
            warn!(%from, "Order changed concurrently, transition refused");
            return Err(ConflictKind::ConcurrentUpdate.into());
        }
        order.apply(change);

        info!(%from, "Order status changed");
        if to == OrderStatus::Refunded {
            info!(total = %order.totals.total_price, "Order refunded");
        }
        self.notifications
            .dispatch(OrderEvent::status_changed(&order, from));
        Ok(order)
    }

    /// Cancel an order and put its stock back.
    ///
    /// Allowed for the owner, admins and the system, from `pending` or
    /// `confirmed`. Cancelling an already cancelled order returns it
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the order does not exist
    /// - `Unauthorized` if the actor does not own the order
    /// - `Conflict` once fulfillment has started, or on a concurrent change
    #[instrument(skip(self, reason), fields(order_id = %id, actor = %actor))]
    pub async fn cancel(&self, id: OrderId, actor: &Actor, reason: Option<String>) -> Result<Order> {
        let mut order = self.load(id).await?;
        if !order.is_visible_to(actor) {
            return Err(AppError::Unauthorized(format!(
                "order {id} belongs to another customer"
            )));
        }
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let note = reason.unwrap_or_else(|| "order cancelled".to_string());
        let change = order.plan_transition(OrderStatus::Cancelled, note, actor.clone(), Utc::now())?;

        if !self.orders.apply_transition(id, &change).await? {
            // Lost a race; a concurrent cancel is fine, anything else is not.
            let current = self.load(id).await?;
            if current.status == OrderStatus::Cancelled {
                return Ok(current);
            }
            return Err(ConflictKind::ConcurrentUpdate.into());
        }

        // Only the writer that won the compare-and-set releases stock.
        let reservations: Vec<Reservation> = order
            .items
            .iter()
            .map(|item| Reservation {
                product_id: item.product_id,
                quantity: item.quantity.get(),
            })
            .collect();
        self.ledger.release_all(&reservations).await;
        order.apply(change);

        if order.is_paid {
            warn!(
                order_number = %order.order_number,
                total = %order.totals.total_price,
                "Paid order cancelled, refund required"
            );
        }
        info!(order_number = %order.order_number, "Order cancelled");
        self.notifications.dispatch(OrderEvent::cancelled(&order));
        Ok(order)
    }

    /// Cancel unpaid pending orders older than the configured age.
    ///
    /// Returns the number of orders cancelled. Orders that fail to cancel are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the stale orders cannot be listed.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.pending_ttl;
        let stale = self.orders.list_stale_pending(cutoff).await?;
        let mut expired = 0;
        for order in stale {
            match self
                .cancel(
                    order.id,
                    &Actor::System,
                    Some("payment not received in time".to_string()),
                )
                .await
            {
                Ok(_) => expired += 1,
                Err(e) => warn!(order_id = %order.id, error = %e, "Failed to expire order"),
            }
        }
        if expired > 0 {
            info!(expired, "Expired stale pending orders");
        }
        Ok(expired)
    }
}
