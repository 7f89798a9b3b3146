//! HTTP client for a Stripe-style payment gateway.
//!
//! Creates and retrieves payment intents over a form-encoded REST API and
//! verifies webhook signatures of the form `t=<unix>,v1=<hex hmac>`, where the
//! MAC is HMAC-SHA256 over `"{t}.{payload}"`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, error, instrument};
use url::Url;

use super::error::GatewayError;
use super::types::{
    ApiErrorBody, CreateIntent, ORDER_ID_KEY, ORDER_NUMBER_KEY, PaymentIntent, WebhookEvent,
};
use super::PaymentGateway;
use crate::config::PaymentConfig;

/// Maximum age of a webhook signature, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Payment gateway client.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    api_base: Url,
    secret_key: SecretString,
    webhook_secret: SecretString,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.api_base
            .join(path)
            .map_err(|e| GatewayError::Request(format!("invalid gateway url: {e}")))
    }

    /// Turn a gateway response into a payment intent or an API error.
    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            error!(status = status.as_u16(), %message, "Payment gateway API error");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Response(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount_minor))]
    async fn create_intent(&self, request: &CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let order_id_key = format!("metadata[{ORDER_ID_KEY}]");
        let order_number_key = format!("metadata[{ORDER_NUMBER_KEY}]");
        let form = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.gateway_code().to_string()),
            (order_id_key.as_str(), request.order_id.to_string()),
            (order_number_key.as_str(), request.order_number.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(self.endpoint("v1/payment_intents")?)
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", request.idempotency_key())
            .form(&form)
            .send()
            .await?;

        let intent = Self::read_intent(response).await?;
        debug!(intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .get(self.endpoint(&format!("v1/payment_intents/{intent_id}"))?)
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        Self::read_intent(response).await
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> Result<WebhookEvent, GatewayError> {
        let now = chrono::Utc::now().timestamp();
        verify_signature(
            self.webhook_secret.expose_secret(),
            payload,
            signature,
            now,
        )?;

        serde_json::from_str(payload).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
    }
}

/// Verify a webhook signature header against `payload` at time `now`.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidSignature`] if the header is malformed, the
/// timestamp is outside the tolerance window, or no `v1` signature matches.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now: i64,
) -> Result<(), GatewayError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| GatewayError::InvalidSignature("missing timestamp".to_string()))?;
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| GatewayError::InvalidSignature("invalid timestamp".to_string()))?;

    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(GatewayError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = signature_hex(secret, timestamp, payload)
        .map_err(|e| GatewayError::InvalidSignature(e.to_string()))?;

    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        debug!("Webhook signature verified");
        Ok(())
    } else {
        Err(GatewayError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
fn signature_hex(
    secret: &str,
    timestamp: impl std::fmt::Display,
    payload: &str,
) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signature header for `payload`, as the gateway would.
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
pub fn sign_payload(secret: &str, payload: &str, timestamp: i64) -> String {
    // HMAC keys of any length are accepted, so the error arm is unreachable.
    let signature = signature_hex(secret, timestamp, payload).unwrap_or_default();
    format!("t={timestamp},v1={signature}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_k3Jq9vXz2LmP8rT5";
    const BODY: &str = r#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[test]
    fn test_signature_valid() {
        let now = 1_767_225_600;
        let header = sign_payload(SECRET, BODY, now);
        assert!(verify_signature(SECRET, BODY, &header, now + 10).is_ok());
    }

    #[test]
    fn test_signature_accepts_any_matching_v1() {
        let now = 1_767_225_600;
        let header = sign_payload(SECRET, BODY, now);
        let rotated = format!("{header},v1=deadbeef");
        assert!(verify_signature(SECRET, BODY, &rotated, now).is_ok());
    }

    #[test]
    fn test_signature_tampered_body() {
        let now = 1_767_225_600;
        let header = sign_payload(SECRET, BODY, now);
        let result = verify_signature(SECRET, r#"{"id":"evt_2"}"#, &header, now);
        assert!(matches!(result, Err(GatewayError::InvalidSignature(_))));
    }

    #[test]
    fn test_signature_replay_window() {
        let now = 1_767_225_600;
        let header = sign_payload(SECRET, BODY, now - 301);
        let result = verify_signature(SECRET, BODY, &header, now);
        assert!(matches!(
            result,
            Err(GatewayError::InvalidSignature(msg)) if msg.contains("tolerance")
        ));
    }

    #[test]
    fn test_signature_malformed_header() {
        assert!(verify_signature(SECRET, BODY, "v1=abc", 0).is_err());
        assert!(verify_signature(SECRET, BODY, "t=abc,v1=abc", 0).is_err());
        assert!(verify_signature(SECRET, BODY, "", 0).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let gateway = HttpPaymentGateway::new(&PaymentConfig {
            api_base: Url::parse("https://api.example.test/").unwrap(),
            secret_key: SecretString::from("sk_live_super_secret"),
            webhook_secret: SecretString::from(SECRET),
            timeout: std::time::Duration::from_secs(10),
        })
        .unwrap();

        let debug_output = format!("{gateway:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk_live_super_secret"));
    }
}
