//! Order event notifications.
//!
//! Notifications are fire-and-forget: [`NotificationDispatcher::dispatch`]
//! hands the event to a spawned task and returns immediately. Delivery
//! failures are logged and never reach the operation that raised the event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use guardline_core::{Money, OrderId, OrderStatus};

use crate::models::Order;

/// Timeout for outbound notification requests.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Events raised by the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderCreated {
        order_id: OrderId,
        order_number: String,
        total: Money,
        at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: OrderId,
        order_number: String,
        was_paid: bool,
        at: DateTime<Utc>,
    },
    OrderPaid {
        order_id: OrderId,
        order_number: String,
        amount: Money,
        at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: OrderId,
        order_number: String,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    },
}

impl OrderEvent {
    #[must_use]
    pub fn created(order: &Order) -> Self {
        Self::OrderCreated {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total: order.totals.total_price,
            at: order.created_at,
        }
    }

    #[must_use]
    pub fn cancelled(order: &Order) -> Self {
        Self::OrderCancelled {
            order_id: order.id,
            order_number: order.order_number.clone(),
            was_paid: order.is_paid,
            at: order.updated_at,
        }
    }

    #[must_use]
    pub fn paid(order: &Order) -> Self {
        Self::OrderPaid {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.totals.total_price,
            at: order.paid_at.unwrap_or(order.updated_at),
        }
    }

    #[must_use]
    pub fn status_changed(order: &Order, from: OrderStatus) -> Self {
        Self::OrderStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            from,
            to: order.status,
            at: order.updated_at,
        }
    }

    /// The order the event is about.
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::OrderPaid { order_id, .. }
            | Self::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }

    /// Event name as serialized.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order_created",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::OrderPaid { .. } => "order_paid",
            Self::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// Errors that can occur when delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Receiver answered with a non-success status.
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Receives order events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &OrderEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        info!(event = event.name(), order_id = %event.order_id(), "Order event");
        Ok(())
    }
}

/// Posts events as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(url: Url) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        let response = self.client.post(self.url.clone()).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Fans order events out to a [`Notifier`] without blocking the caller.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Deliver `event` on a background task.
    pub fn dispatch(&self, event: OrderEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(
                    event = event.name(),
                    order_id = %event.order_id(),
                    error = %e,
                    "Failed to deliver order notification"
                );
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = OrderEvent::OrderPaid {
            order_id: OrderId::new(9),
            order_number: "GL-20260101-ABCDEF".to_string(),
            amount: Money::from_cents(6979),
            at: DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "order_paid");
        assert_eq!(json["order_id"], 9);
        assert_eq!(event.name(), "order_paid");
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &OrderEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected(503))
        }
    }

    #[tokio::test]
    async fn test_dispatch_failure_does_not_propagate() {
        let dispatcher = NotificationDispatcher::new(Arc::new(FailingNotifier));
        dispatcher.dispatch(OrderEvent::OrderCancelled {
            order_id: OrderId::new(1),
            order_number: "GL-20260101-AAAAAA".to_string(),
            was_paid: false,
            at: Utc::now(),
        });
        tokio::task::yield_now().await;
    }
}
