//! Payment gateway errors.

use thiserror::Error;

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed before a response arrived.
    #[error("payment gateway request failed: {0}")]
    Request(String),

    /// The call did not finish within the configured timeout.
    #[error("payment gateway timed out")]
    Timeout,

    /// Failed to parse a gateway response.
    #[error("payment gateway response error: {0}")]
    Response(String),

    /// The gateway answered with an error.
    #[error("payment gateway API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the gateway.
        message: String,
    },

    /// Webhook signature missing, malformed, stale or wrong.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Webhook body could not be parsed.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e.to_string())
        }
    }
}
