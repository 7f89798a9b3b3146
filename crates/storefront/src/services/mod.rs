//! Business logic services for the order core.
//!
//! # Services
//!
//! - [`inventory`] - Inventory ledger: atomic stock reserve/release, all-or-nothing batches
//! - [`cart`] - Cart store: per-owner lines, coupons, login merge, expiry
//! - [`coupons`] - Coupon engine: code validation, discount pricing, usage counting
//! - [`orders`] - Order orchestrator: checkout saga and status lifecycle
//! - [`payments`] - Payment reconciler: intents, confirmation, webhooks
//! - [`notifications`] - Fire-and-forget order events
//!
//! Services depend on repository traits and the [`PaymentGateway`] trait
//! only, so the same wiring runs over `PostgreSQL` or the in-memory store.

pub mod cart;
pub mod coupons;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;

use std::sync::Arc;
use std::time::Duration;

pub use cart::{CartLineView, CartStore, CartView};
pub use coupons::{AppliedCoupon, CouponEngine};
pub use inventory::{InventoryLedger, Reservation};
pub use notifications::{
    LogNotifier, NotificationDispatcher, Notifier, NotifyError, OrderEvent, WebhookNotifier,
};
pub use orders::{CheckoutRequest, OrderOrchestrator};
pub use payments::{PaymentReconciler, PaymentSession, WebhookOutcome};

use crate::config::StoreConfig;
use crate::db::Repositories;
use crate::gateway::PaymentGateway;

/// The services a request handler or job can call.
#[derive(Clone)]
pub struct Services {
    pub carts: CartStore,
    pub orders: OrderOrchestrator,
    pub payments: PaymentReconciler,
}

impl Services {
    /// Wire every service over one set of repositories.
    #[must_use]
    pub fn new(
        repos: &Repositories,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        store: &StoreConfig,
        gateway_timeout: Duration,
    ) -> Self {
        let notifications = NotificationDispatcher::new(notifier);
        let coupons = CouponEngine::new(Arc::clone(&repos.coupons));
        let ledger = InventoryLedger::new(Arc::clone(&repos.products));

        let carts = CartStore::new(
            Arc::clone(&repos.carts),
            Arc::clone(&repos.products),
            coupons.clone(),
            store.cart_ttl,
        );
        let orders = OrderOrchestrator::new(
            Arc::clone(&repos.orders),
            Arc::clone(&repos.carts),
            Arc::clone(&repos.products),
            ledger,
            coupons,
            store.pricing,
            store.pending_order_ttl,
            notifications.clone(),
        );
        let payments = PaymentReconciler::new(
            Arc::clone(&repos.orders),
            gateway,
            store.currency,
            gateway_timeout,
            notifications,
        );

        Self {
            carts,
            orders,
            payments,
        }
    }
}
