//! Payment gateway wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use guardline_core::{CurrencyCode, OrderId};

/// Metadata key carrying the order id on an intent.
pub const ORDER_ID_KEY: &str = "order_id";
/// Metadata key carrying the order number on an intent.
pub const ORDER_NUMBER_KEY: &str = "order_number";

/// Request to create a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntent {
    /// Amount in minor units (cents).
    pub amount_minor: i64,
    /// Store currency.
    pub currency: CurrencyCode,
    /// Order the charge is for.
    pub order_id: OrderId,
    /// Human-facing order number, shown in the gateway dashboard.
    pub order_number: String,
}

impl CreateIntent {
    /// Key that makes retried creation requests return the same intent.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("order-{}-{}", self.order_id, self.amount_minor)
    }
}

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    /// Whether the customer can still complete this intent.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(
            self,
            Self::RequiresPaymentMethod
                | Self::RequiresConfirmation
                | Self::RequiresAction
                | Self::Processing
        )
    }

    /// Gateway spelling, stored on the payment record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Unknown => "unknown",
        }
    }
}

/// A payment intent as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    /// Amount in minor units.
    pub amount: i64,
    #[serde(default)]
    pub amount_received: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Failure reason on failed attempts.
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

impl PaymentIntent {
    /// Order id recorded in the intent metadata.
    #[must_use]
    pub fn order_id(&self) -> Option<OrderId> {
        self.metadata.get(ORDER_ID_KEY)?.parse().ok()
    }

    /// Amount actually collected, falling back to the requested amount.
    #[must_use]
    pub fn collected_amount(&self) -> i64 {
        self.amount_received.unwrap_or(self.amount)
    }
}

/// Error attached to a failed payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

/// Event payload wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventData {
    pub object: PaymentIntent,
}

/// Event types the reconciler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    Other,
}

impl WebhookEvent {
    /// Classify the event type.
    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        match self.kind.as_str() {
            "payment_intent.succeeded" => EventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => EventKind::PaymentFailed,
            _ => EventKind::Other,
        }
    }

    /// The intent the event is about.
    #[must_use]
    pub const fn intent(&self) -> &PaymentIntent {
        &self.data.object
    }
}

/// Error envelope returned by the gateway API.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_succeeded_event() {
        let body = r#"{
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_1",
                "status": "succeeded",
                "amount": 6979,
                "amount_received": 6979,
                "currency": "usd",
                "metadata": {"order_id": "42", "order_number": "GL-20260101-ABC123"}
            }}
        }"#;
        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_kind(), EventKind::PaymentSucceeded);
        assert_eq!(event.intent().order_id(), Some(OrderId::new(42)));
        assert_eq!(event.intent().collected_amount(), 6979);
    }

    #[test]
    fn test_unknown_status_and_event() {
        let body = r#"{
            "id": "evt_2",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "pi_2", "status": "something_new", "amount": 100, "currency": "usd"
            }}
        }"#;
        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_kind(), EventKind::Other);
        assert_eq!(event.intent().status, IntentStatus::Unknown);
        assert_eq!(event.intent().order_id(), None);
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let req = CreateIntent {
            amount_minor: 1999,
            currency: CurrencyCode::USD,
            order_id: OrderId::new(7),
            order_number: "GL-20260101-AAAAAA".to_string(),
        };
        assert_eq!(req.idempotency_key(), "order-7-1999");
    }
}
