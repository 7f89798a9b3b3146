//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                          - Liveness
//! GET    /health/ready                    - Readiness (database ping)
//!
//! # Cart
//! GET    /cart                            - Show cart
//! DELETE /cart                            - Clear cart
//! POST   /cart/items                      - Add item
//! PATCH  /cart/items/{product_id}         - Set quantity
//! DELETE /cart/items/{product_id}         - Remove item
//! POST   /cart/coupon                     - Apply coupon
//! DELETE /cart/coupon                     - Remove coupon
//! POST   /cart/merge                      - Merge session cart after login
//!
//! # Checkout
//! POST   /checkout                        - Place order from cart
//!
//! # Orders
//! GET    /orders                          - Caller's orders
//! GET    /orders/{id}                     - Order detail
//! POST   /orders/{id}/cancel              - Cancel order
//! POST   /orders/{id}/status              - Change status (staff)
//! POST   /orders/{id}/payment             - Start card payment
//! POST   /orders/{id}/payment/confirm     - Confirm card payment
//! POST   /orders/{id}/payment/cash        - Record cash payment (staff)
//!
//! # Webhooks
//! POST   /webhooks/payment                - Payment gateway events
//! ```

pub mod cart;
pub mod health;
pub mod orders;
pub mod webhooks;

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{product_id}",
            patch(cart::update_item).delete(cart::remove_item),
        )
        .route(
            "/coupon",
            post(cart::apply_coupon).delete(cart::remove_coupon),
        )
        .route("/merge", post(cart::merge))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/cancel", post(orders::cancel))
        .route("/{id}/status", post(orders::update_status))
        .route("/{id}/payment", post(orders::start_payment))
        .route("/{id}/payment/confirm", post(orders::confirm_payment))
        .route("/{id}/payment/cash", post(orders::record_cash_payment))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/cart", cart_routes())
        .route("/checkout", post(orders::checkout))
        .nest("/orders", order_routes())
        .route("/webhooks/payment", post(webhooks::payment))
}

/// The full application: routes, request ids and tracing, bound to `state`.
///
/// Sentry layers are added by the binary.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
