//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. Services and route handlers return
//! `Result<T, AppError>`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use guardline_core::{Money, OrderStatus, ProductId, QuantityError, ShippingError};

use crate::db::RepositoryError;
use crate::gateway::GatewayError;
use crate::models::TransitionError;

/// Business-rule conflicts. Each variant maps to a stable `code` in the
/// response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("insufficient stock for product {product_id} (requested {requested}, available {available})")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("product {product_id} is not available")]
    ProductUnavailable { product_id: ProductId },

    #[error("coupon {code} has reached its usage limit")]
    CouponExhausted { code: String },

    #[error("cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("order is already paid")]
    AlreadyPaid,

    #[error("order has not been paid")]
    NotPaid,

    #[error("payment has not completed")]
    PaymentNotCompleted,

    #[error("payment amount {received} does not match order total {expected}")]
    PaymentAmountMismatch { expected: Money, received: Money },

    #[error("order in status {status} cannot be paid")]
    OrderNotPayable { status: OrderStatus },

    #[error("order was modified concurrently")]
    ConcurrentUpdate,
}

impl ConflictKind {
    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::CouponExhausted { .. } => "coupon_exhausted",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::AlreadyPaid => "already_paid",
            Self::NotPaid => "not_paid",
            Self::PaymentNotCompleted => "payment_not_completed",
            Self::PaymentAmountMismatch { .. } => "payment_amount_mismatch",
            Self::OrderNotPayable { .. } => "order_not_payable",
            Self::ConcurrentUpdate => "concurrent_update",
        }
    }
}

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or rule-violating input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Business-rule conflict.
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictKind),

    /// Caller may not act on the resource.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Payment gateway failed or timed out.
    #[error("External service error: {0}")]
    ExternalService(#[from] GatewayError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable kind string used in response bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::ExternalService(_) => "external_service",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::ExternalService(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        let kind = match err {
            TransitionError::Illegal { from, to } => ConflictKind::IllegalTransition { from, to },
            TransitionError::NotPaid => ConflictKind::NotPaid,
            TransitionError::AlreadyPaid => ConflictKind::AlreadyPaid,
        };
        Self::Conflict(kind)
    }
}

impl From<QuantityError> for AppError {
    fn from(err: QuantityError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ShippingError> for AppError {
    fn from(err: ShippingError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::ExternalService(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::ExternalService(_) => "Payment service unavailable".to_string(),
            Self::Validation(msg)
            | Self::NotFound(msg)
            | Self::Unauthorized(msg) => msg.clone(),
            Self::Conflict(kind) => kind.to_string(),
        };

        let mut body = json!({
            "error": {
                "kind": self.kind(),
                "message": message,
            }
        });
        if let Self::Conflict(kind) = &self {
            body["error"]["code"] = json!(kind.code());
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for order lifecycle actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Stock reserved", Some(&[("order_number", "GL-20260101-ABC123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
