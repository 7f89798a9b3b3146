//! Checkout scenarios: stock reservation under contention, compensation on
//! partial failure, and the order totals invariant.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use guardline_core::{CouponId, Money, ProductId};
use guardline_integration_tests::testing::{
    FakeGateway, RecordingNotifier, TestHarness, percentage_coupon, product, store_config,
};
use guardline_integration_tests::{card_checkout, place_order, stock_of, user};
use guardline_storefront::db::{CouponRepository, MemoryStore, Repositories, RepositoryError};
use guardline_storefront::error::{AppError, ConflictKind};
use guardline_storefront::models::Coupon;
use guardline_storefront::services::{InventoryLedger, Reservation, Services};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell() {
    let h = Arc::new(TestHarness::new());
    h.store.put_product(product(1, 5, 1000)).await;
    h.put_cart(&user(1), &[(1, 3)]).await;
    h.put_cart(&user(2), &[(1, 3)]).await;

    let tasks: Vec<_> = [1, 2]
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.services
                    .orders
                    .create_order(&user(id), card_checkout(None))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Conflict(ConflictKind::InsufficientStock {
                requested,
                available,
                ..
            })) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
                insufficient += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(stock_of(&h, 1).await, 2);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn failed_line_leaves_earlier_reservations_untouched() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 2000)).await;
    h.store.put_product(product(2, 1, 500)).await;

    let err = place_order(&h, &user(1), &[(1, 2), (2, 3)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Conflict(ConflictKind::InsufficientStock { .. })
    ));
    assert_eq!(stock_of(&h, 1).await, 10);
    assert_eq!(stock_of(&h, 2).await, 1);
    assert_eq!(h.store.order_count().await, 0);

    // The cart survives a failed checkout.
    let cart = h.services.carts.get(&user(1)).await.unwrap();
    assert_eq!(cart.item_count(), 5);
}

#[tokio::test]
async fn ledger_batch_rolls_back_on_unavailable_quantity() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 2000)).await;
    h.store.put_product(product(2, 5, 500)).await;
    let ledger = InventoryLedger::new(h.store.clone());

    let err = ledger
        .reserve_all(&[
            Reservation {
                product_id: ProductId::new(1),
                quantity: 2,
            },
            Reservation {
                product_id: ProductId::new(2),
                quantity: 100,
            },
        ])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Conflict(ConflictKind::InsufficientStock { .. })
    ));
    assert_eq!(stock_of(&h, 1).await, 10);
    assert_eq!(stock_of(&h, 2).await, 5);
}

#[tokio::test]
async fn order_totals_add_up() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 1999)).await;
    h.store.put_product(product(2, 10, 4550)).await;
    h.store
        .put_coupon(percentage_coupon(1, "SAFE10", 10, 0))
        .await;
    h.put_cart(&user(1), &[(1, 3), (2, 1)]).await;

    let order = h
        .services
        .orders
        .create_order(&user(1), card_checkout(Some("safe10")))
        .await
        .unwrap();

    let t = order.totals;
    let items: Money = order.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(items, t.items_price);
    assert_eq!(t.items_price, Money::from_cents(10_547));
    assert_eq!(
        t.total_price,
        t.items_price + t.shipping_price + t.tax_price - t.discount_amount
    );
    assert_eq!(t.discount_amount, Money::from_cents(1055));
    assert_eq!(t.shipping_price, Money::ZERO);
    assert_eq!(order.coupon_code.as_deref(), Some("SAFE10"));

    // Checkout consumed the cart and one coupon use.
    assert_eq!(h.services.carts.get(&user(1)).await.unwrap().item_count(), 0);
    let coupon = h
        .store
        .coupon(guardline_core::CouponId::new(1))
        .await
        .unwrap();
    assert_eq!(coupon.usage_count, 1);
}

/// Coupon storage where another checkout takes the last use between
/// pricing and counting.
struct LastUseTakenElsewhere {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl CouponRepository for LastUseTakenElsewhere {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        self.inner.find_by_code(code).await
    }

    async fn increment_usage(&self, id: CouponId) -> Result<bool, RepositoryError> {
        assert!(self.inner.increment_usage(id).await?);
        self.inner.increment_usage(id).await
    }

    async fn decrement_usage(&self, id: CouponId) -> Result<(), RepositoryError> {
        self.inner.decrement_usage(id).await
    }
}

#[tokio::test]
async fn coupon_use_lost_after_reserving_releases_stock() {
    let store = Arc::new(MemoryStore::new());
    store.put_product(product(1, 10, 6000)).await;
    let mut coupon = percentage_coupon(1, "ONCE", 10, 0);
    coupon.usage_limit = Some(1);
    store.put_coupon(coupon).await;

    let mut repos = Repositories::memory(&store);
    repos.coupons = Arc::new(LastUseTakenElsewhere {
        inner: Arc::clone(&store),
    });
    let services = Services::new(
        &repos,
        Arc::new(FakeGateway::new()),
        Arc::new(RecordingNotifier::new()),
        &store_config(),
        Duration::from_secs(2),
    );

    let owner = user(1);
    services.carts.add_item(&owner, ProductId::new(1), 2).await.unwrap();

    let err = services
        .orders
        .create_order(&owner, card_checkout(Some("ONCE")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Conflict(ConflictKind::CouponExhausted { .. })
    ));
    assert_eq!(store.product(ProductId::new(1)).await.unwrap().stock, 10);
    assert_eq!(store.coupon(CouponId::new(1)).await.unwrap().usage_count, 1);
    assert_eq!(store.order_count().await, 0);
    assert_eq!(services.carts.get(&owner).await.unwrap().item_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_use_coupon_admits_one_of_two_concurrent_checkouts() {
    let h = Arc::new(TestHarness::new());
    h.store.put_product(product(1, 20, 6000)).await;
    let mut coupon = percentage_coupon(1, "ONCE", 10, 0);
    coupon.usage_limit = Some(1);
    h.store.put_coupon(coupon).await;
    h.put_cart(&user(1), &[(1, 2)]).await;
    h.put_cart(&user(2), &[(1, 2)]).await;

    let tasks: Vec<_> = [1, 2]
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.services
                    .orders
                    .create_order(&user(id), card_checkout(Some("ONCE")))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Conflict(ConflictKind::CouponExhausted { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(stock_of(&h, 1).await, 18);
    assert_eq!(h.store.coupon(CouponId::new(1)).await.unwrap().usage_count, 1);
}
