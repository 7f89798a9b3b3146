//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::services::{CartStore, OrderOrchestrator, PaymentReconciler, Services};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// services and, when running against `PostgreSQL`, the connection pool.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: Services,
    pool: Option<PgPool>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `services` - Wired order-core services
    /// * `pool` - `PostgreSQL` pool checked by the readiness probe; `None`
    ///   when running over the in-memory store
    #[must_use]
    pub fn new(services: Services, pool: Option<PgPool>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { services, pool }),
        }
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn carts(&self) -> &CartStore {
        &self.inner.services.carts
    }

    /// Get a reference to the order orchestrator.
    #[must_use]
    pub fn orders(&self) -> &OrderOrchestrator {
        &self.inner.services.orders
    }

    /// Get a reference to the payment reconciler.
    #[must_use]
    pub fn payments(&self) -> &PaymentReconciler {
        &self.inner.services.payments
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
