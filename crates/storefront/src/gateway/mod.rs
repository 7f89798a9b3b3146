//! Payment gateway integration.
//!
//! The order core talks to the gateway only through [`PaymentGateway`]:
//! creating intents for card payments, re-reading them on synchronous
//! confirmation, and authenticating webhook deliveries.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{HttpPaymentGateway, verify_signature};
#[cfg(any(test, feature = "test-utils"))]
pub use client::sign_payload;
pub use error::GatewayError;
pub use types::{
    CreateIntent, EventData, EventKind, IntentStatus, PaymentError, PaymentIntent, WebhookEvent,
};

/// External payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent. Amounts are in minor units of the store
    /// currency.
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError>;

    /// Fetch the current state of an intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    /// Authenticate a webhook delivery and parse its event.
    fn verify_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, GatewayError>;
}
