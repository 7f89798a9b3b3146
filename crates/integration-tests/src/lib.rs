//! Integration tests for the Guardline order core.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p guardline-integration-tests
//! ```
//!
//! Every scenario runs the real services over the in-memory store with a
//! scripted payment gateway, so no database or network is needed.
//!
//! # Test Categories
//!
//! - `checkout` - Stock reservation, compensation and order totals
//! - `lifecycle` - Cancellation, status changes and stale order expiry
//! - `payments` - Idempotent payment reconciliation
//! - `carts` - Login merge and coupon boundaries
//! - `http` - Routes, status codes and error bodies

#![allow(clippy::missing_panics_doc)]

use guardline_core::{Owner, PaymentMethod, SessionToken, UserId};
use guardline_storefront::error::AppError;
use guardline_storefront::models::Order;
use guardline_storefront::services::CheckoutRequest;
use guardline_storefront::testing::{TestHarness, shipping};

pub use guardline_storefront::testing;

/// An authenticated customer.
#[must_use]
pub const fn user(id: i32) -> Owner {
    Owner::User(UserId::new(id))
}

/// An anonymous shopper.
#[must_use]
pub fn session(token: &str) -> Owner {
    Owner::Session(SessionToken::parse(token).unwrap_or_else(|e| panic!("bad token: {e}")))
}

/// A checkout request paying by card.
#[must_use]
pub fn card_checkout(coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        shipping: shipping(),
        payment_method: PaymentMethod::Card,
        coupon_code: coupon_code.map(str::to_string),
    }
}

/// Put `lines` in `owner`'s cart and check out by card.
pub async fn place_order(
    h: &TestHarness,
    owner: &Owner,
    lines: &[(i32, u32)],
) -> Result<Order, AppError> {
    h.put_cart(owner, lines).await;
    h.services
        .orders
        .create_order(owner, card_checkout(None))
        .await
}

/// Current stock of a product in the harness store.
pub async fn stock_of(h: &TestHarness, id: i32) -> u32 {
    h.store
        .product(guardline_core::ProductId::new(id))
        .await
        .map_or_else(|| panic!("product {id} missing"), |p| p.stock)
}
