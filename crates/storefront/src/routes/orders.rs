//! Checkout, order and payment route handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use guardline_core::{OrderId, OrderStatus};

use crate::error::Result;
use crate::middleware::Caller;
use crate::models::Order;
use crate::services::{CheckoutRequest, PaymentSession};
use crate::state::AppState;

/// Body of `POST /orders/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /orders/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
}

/// Body of `POST /orders/{id}/payment/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
}

/// Turn the caller's cart into an order.
#[instrument(skip(state, request))]
pub async fn checkout(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let owner = caller.owner()?;
    let order = state.orders().create_order(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// The caller's orders, newest first.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<Order>>> {
    let owner = caller.owner()?;
    Ok(Json(state.orders().list_orders(&owner).await?))
}

#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.orders().get_order(id, &caller.actor()?).await?))
}

#[instrument(skip(state))]
pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<Order>> {
    let order = state
        .orders()
        .cancel(id, &caller.actor()?, body.reason)
        .await?;
    Ok(Json(order))
}

/// Move an order along its lifecycle. Staff only, except cancellation.
#[instrument(skip(state))]
pub async fn update_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<Order>> {
    let order = state
        .orders()
        .update_status(id, body.status, body.note, &caller.actor()?)
        .await?;
    Ok(Json(order))
}

/// Open (or reuse) a card payment for an order.
#[instrument(skip(state))]
pub async fn start_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentSession>> {
    Ok(Json(
        state.payments().start_payment(id, &caller.actor()?).await?,
    ))
}

/// Client-side confirmation after the payment form succeeds.
#[instrument(skip(state))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
    Json(body): Json<ConfirmPaymentRequest>,
) -> Result<Json<Order>> {
    let order = state
        .payments()
        .confirm_synchronously(id, &body.payment_intent_id, &caller.actor()?)
        .await?;
    Ok(Json(order))
}

/// Record cash collected on delivery. Staff only.
#[instrument(skip(state))]
pub async fn record_cash_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(
        state
            .payments()
            .record_cash_payment(id, &caller.actor()?)
            .await?,
    ))
}
