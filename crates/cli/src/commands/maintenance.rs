//! Scheduled maintenance jobs.
//!
//! Both jobs are safe to run concurrently with the storefront and with each
//! other; every write they make goes through the same conditional updates
//! the request handlers use.

use std::sync::Arc;

use chrono::Utc;

use guardline_storefront::config::StoreConfig;
use guardline_storefront::db::{OrderRepository, Repositories};
use guardline_storefront::services::{
    CartStore, CouponEngine, InventoryLedger, LogNotifier, NotificationDispatcher,
    OrderOrchestrator,
};

use super::CommandError;

/// Delete anonymous carts whose expiry has passed.
pub async fn purge_carts() -> Result<(), CommandError> {
    let pool = super::connect().await?;
    let store = StoreConfig::from_env()?;
    let repos = Repositories::postgres(&pool);

    let carts = CartStore::new(
        Arc::clone(&repos.carts),
        Arc::clone(&repos.products),
        CouponEngine::new(Arc::clone(&repos.coupons)),
        store.cart_ttl,
    );
    let purged = carts.purge_expired(Utc::now()).await?;

    tracing::info!(purged, "Cart purge complete");
    Ok(())
}

/// Cancel unpaid pending orders older than the configured age and return
/// their stock.
pub async fn expire_orders(dry_run: bool) -> Result<(), CommandError> {
    let pool = super::connect().await?;
    let store = StoreConfig::from_env()?;
    let repos = Repositories::postgres(&pool);
    let now = Utc::now();

    if dry_run {
        let stale = repos
            .orders
            .list_stale_pending(now - store.pending_order_ttl)
            .await?;
        for order in &stale {
            tracing::info!(
                order_id = %order.id,
                order_number = %order.order_number,
                created_at = %order.created_at,
                "Would expire order"
            );
        }
        tracing::info!(count = stale.len(), "Dry run complete");
        return Ok(());
    }

    let orders = OrderOrchestrator::new(
        Arc::clone(&repos.orders),
        Arc::clone(&repos.carts),
        Arc::clone(&repos.products),
        InventoryLedger::new(Arc::clone(&repos.products)),
        CouponEngine::new(Arc::clone(&repos.coupons)),
        store.pricing,
        store.pending_order_ttl,
        NotificationDispatcher::new(Arc::new(LogNotifier)),
    );
    let expired = orders.expire_stale_pending(now).await?;

    tracing::info!(expired, "Order expiry complete");
    Ok(())
}
