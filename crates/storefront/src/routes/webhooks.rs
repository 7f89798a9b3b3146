//! Payment gateway webhook endpoint.
//!
//! The body is taken as a raw string: the signature covers the exact bytes
//! the gateway sent.

use axum::{Json, extract::State, http::HeaderMap};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::services::WebhookOutcome;
use crate::state::AppState;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// Receive a gateway event.
///
/// Answers 2xx for anything verified, including events that were ignored or
/// rejected, so the gateway stops redelivering them. Store failures answer
/// 5xx and the gateway retries.
#[instrument(skip_all)]
pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation(format!("missing {SIGNATURE_HEADER} header")))?;
    Ok(Json(
        state.payments().handle_webhook(&body, signature).await?,
    ))
}
