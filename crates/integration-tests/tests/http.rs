//! HTTP surface: routing, caller identity, status codes and error bodies.

#![allow(clippy::unwrap_used)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use guardline_integration_tests::testing::{TestHarness, product, shipping};
use guardline_integration_tests::stock_of;
use guardline_storefront::routes;

fn app(h: &TestHarness) -> Router {
    routes::app(h.app_state())
}

fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

const CUSTOMER: (&str, &str) = ("x-user-id", "21");

#[tokio::test]
async fn health_is_ok_without_database() {
    let h = TestHarness::new();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(request("GET", "/health", &[], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, _) = send(&app, request("GET", "/health/ready", &[], None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cart_requires_identity() {
    let h = TestHarness::new();
    let (status, body) = send(&app(&h), request("GET", "/cart", &[], None)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "unauthorized");
}

#[tokio::test]
async fn add_to_cart_then_checkout() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 10, 2500)).await;
    let app = app(&h);

    let (status, cart) = send(
        &app,
        request(
            "POST",
            "/cart/items",
            &[CUSTOMER],
            Some(json!({"product_id": 1, "quantity": 2})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"][0]["quantity"], 2);

    let (status, order) = send(
        &app,
        request(
            "POST",
            "/checkout",
            &[CUSTOMER],
            Some(json!({
                "shipping": serde_json::to_value(shipping()).unwrap(),
                "payment_method": "card",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(stock_of(&h, 1).await, 8);

    let (status, orders) = send(&app, request("GET", "/orders", &[CUSTOMER], None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn over_quantity_is_a_validation_error() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 50, 2500)).await;

    let (status, body) = send(
        &app(&h),
        request(
            "POST",
            "/cart/items",
            &[CUSTOMER],
            Some(json!({"product_id": 1, "quantity": 11})),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn out_of_stock_is_a_conflict() {
    let h = TestHarness::new();
    h.store.put_product(product(1, 1, 2500)).await;
    h.put_cart(&guardline_integration_tests::user(21), &[(1, 3)])
        .await;

    let (status, body) = send(
        &app(&h),
        request(
            "POST",
            "/checkout",
            &[CUSTOMER],
            Some(json!({
                "shipping": serde_json::to_value(shipping()).unwrap(),
                "payment_method": "card",
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "insufficient_stock");
    assert_eq!(stock_of(&h, 1).await, 1);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let h = TestHarness::new();
    let (status, body) = send(&app(&h), request("GET", "/orders/999", &[CUSTOMER], None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn webhook_requires_valid_signature() {
    let h = TestHarness::new();
    let app = app(&h);

    let (status, _) = send(
        &app,
        request("POST", "/webhooks/payment", &[], Some(json!({"id": "evt_1"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/webhooks/payment",
            &[("payment-signature", "t=1,v1=deadbeef")],
            Some(json!({"id": "evt_1"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_webhook_is_acknowledged() {
    let h = TestHarness::new();
    let (payload, signature) =
        h.gateway
            .webhook("evt_2", "charge.refunded", "pi_whatever");

    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/payment")
        .header("payment-signature", signature)
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&app(&h), req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}
