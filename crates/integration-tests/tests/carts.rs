//! Cart scenarios: login merge clamps quantities, and coupon minimums are
//! inclusive.

#![allow(clippy::unwrap_used)]

use chrono::Utc;

use guardline_core::{Money, ProductId, SessionToken, UserId};
use guardline_integration_tests::testing::{TestHarness, percentage_coupon, product};
use guardline_integration_tests::{card_checkout, session, stock_of, user};
use guardline_storefront::error::AppError;
use guardline_storefront::services::CouponEngine;

#[tokio::test]
async fn merge_clamps_to_line_maximum() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 50, 1000)).await;
    h.put_cart(&session("anon-merge"), &[(1, 4)]).await;
    h.put_cart(&user(1), &[(1, 9)]).await;

    let token = SessionToken::parse("anon-merge").unwrap();
    let merged = h
        .services
        .carts
        .merge_on_login(&token, UserId::new(1))
        .await
        .unwrap();

    assert_eq!(merged.items.len(), 1);
    assert_eq!(merged.items[0].quantity.get(), 10);
    assert_eq!(merged.item_count(), 10);

    // The session cart is gone, and merging again changes nothing.
    let anon = h.services.carts.get(&session("anon-merge")).await.unwrap();
    assert!(anon.items.is_empty());
    let again = h
        .services
        .carts
        .merge_on_login(&token, UserId::new(1))
        .await
        .unwrap();
    assert_eq!(again.item_count(), 10);
}

#[tokio::test]
async fn merge_without_user_cart_moves_session_cart() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 50, 1000)).await;
    h.store.put_product(product(2, 50, 300)).await;
    h.put_cart(&session("anon-move"), &[(1, 2), (2, 1)]).await;

    let token = SessionToken::parse("anon-move").unwrap();
    let merged = h
        .services
        .carts
        .merge_on_login(&token, UserId::new(7))
        .await
        .unwrap();

    assert_eq!(merged.item_count(), 3);
    assert_eq!(merged.subtotal, Money::from_cents(2300));
    assert!(merged.expires_at.is_none());
    assert_eq!(h.store.cart_count().await, 1);
}

#[tokio::test]
async fn coupon_minimum_is_inclusive() {
    let h = TestHarness::new();
    h.store
        .put_coupon(percentage_coupon(1, "MIN50", 10, 5000))
        .await;
    let engine = CouponEngine::new(h.store.clone());
    let now = Utc::now();

    let at_minimum = engine
        .validate("min50", Money::from_cents(5000), now)
        .await
        .unwrap();
    assert_eq!(at_minimum.discount_amount, Money::from_cents(500));

    let below = engine
        .validate("MIN50", Money::from_cents(4999), now)
        .await
        .unwrap();
    assert_eq!(below.discount_amount, Money::ZERO);
    assert!(!below.is_applicable());
}

#[tokio::test]
async fn checkout_below_coupon_minimum_fails_cleanly() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 4999)).await;
    h.store
        .put_coupon(percentage_coupon(1, "MIN50", 10, 5000))
        .await;
    h.put_cart(&user(1), &[(1, 1)]).await;

    let err = h
        .services
        .orders
        .create_order(&user(1), card_checkout(Some("MIN50")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(stock_of(&h, 1).await, 10);
    assert_eq!(h.store.order_count().await, 0);
    let cart = h.services.carts.get(&user(1)).await.unwrap();
    assert_eq!(cart.items[0].product_id, ProductId::new(1));
}

#[tokio::test]
async fn unavailable_products_are_not_priced() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 1000)).await;
    h.store.put_product(product(2, 10, 500)).await;
    h.put_cart(&user(1), &[(1, 1), (2, 2)]).await;

    let mut gone = product(2, 10, 500);
    gone.status = guardline_core::ProductStatus::Discontinued;
    h.store.put_product(gone).await;

    let cart = h.services.carts.get(&user(1)).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.unavailable, vec![ProductId::new(2)]);
    assert_eq!(cart.subtotal, Money::from_cents(1000));
}
