//! Cart route handlers.
//!
//! Every handler addresses the caller's own cart; see [`Caller::owner`].

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use guardline_core::ProductId;

use crate::error::{AppError, Result};
use crate::middleware::Caller;
use crate::services::CartView;
use crate::state::AppState;

/// Body of `POST /cart/items`.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Body of `PATCH /cart/items/{product_id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

/// Body of `POST /cart/coupon`.
#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

/// Show the caller's cart.
#[instrument(skip(state))]
pub async fn show(State(state): State<AppState>, caller: Caller) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    Ok(Json(state.carts().get(&owner).await?))
}

/// Add a product, merging with an existing line.
#[instrument(skip(state))]
pub async fn add_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<AddItemRequest>,
) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    let cart = state
        .carts()
        .add_item(&owner, body.product_id, body.quantity)
        .await?;
    Ok(Json(cart))
}

/// Set a line's quantity.
#[instrument(skip(state))]
pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<ProductId>,
    Json(body): Json<UpdateQuantityRequest>,
) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    let cart = state
        .carts()
        .update_quantity(&owner, product_id, body.quantity)
        .await?;
    Ok(Json(cart))
}

/// Remove a line.
#[instrument(skip(state))]
pub async fn remove_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<ProductId>,
) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    Ok(Json(state.carts().remove_item(&owner, product_id).await?))
}

/// Empty the cart.
#[instrument(skip(state))]
pub async fn clear(State(state): State<AppState>, caller: Caller) -> Result<StatusCode> {
    let owner = caller.owner()?;
    state.carts().clear(&owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn apply_coupon(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ApplyCouponRequest>,
) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    Ok(Json(state.carts().apply_coupon(&owner, &body.code).await?))
}

#[instrument(skip(state))]
pub async fn remove_coupon(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<CartView>> {
    let owner = caller.owner()?;
    Ok(Json(state.carts().remove_coupon(&owner).await?))
}

/// Fold the caller's anonymous cart into their account cart after login.
///
/// Requires both `x-user-id` and `x-session-token`.
#[instrument(skip(state))]
pub async fn merge(State(state): State<AppState>, caller: Caller) -> Result<Json<CartView>> {
    let (Some(user), Some(session)) = (caller.user, caller.session.as_ref()) else {
        return Err(AppError::Validation(
            "merging needs both a user id and a session token".to_string(),
        ));
    };
    Ok(Json(state.carts().merge_on_login(session, user).await?))
}
