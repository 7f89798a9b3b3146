//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `PAYMENT_SECRET_KEY` - Payment gateway API secret key (high entropy)
//! - `PAYMENT_WEBHOOK_SECRET` - Payment gateway webhook signing secret (high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - ISO 4217 store currency (default: USD)
//! - `STORE_FLAT_SHIPPING` - Shipping charged below the threshold (default: 9.99)
//! - `STORE_FREE_SHIPPING_THRESHOLD` - Items price for free shipping (default: 100.00)
//! - `STORE_TAX_RATE` - Tax rate as a fraction (default: 0)
//! - `CART_TTL_DAYS` - Inactivity lifetime of anonymous carts (default: 7)
//! - `PENDING_ORDER_TTL_HOURS` - Age at which unpaid pending orders expire (default: 24)
//! - `PAYMENT_API_BASE` - Payment gateway API base URL (default: <https://api.stripe.com/>)
//! - `PAYMENT_TIMEOUT_SECS` - Payment gateway call timeout (default: 10)
//! - `NOTIFY_WEBHOOK_URL` - Endpoint receiving order event notifications
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use guardline_core::{CurrencyCode, Money};

use crate::models::PricingRules;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Pricing and lifetime rules
    pub store: StoreConfig,
    /// Payment gateway configuration
    pub payment: PaymentConfig,
    /// Endpoint receiving order event notifications
    pub notify_webhook_url: Option<Url>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Store-wide commercial rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// The single currency the store sells in
    pub currency: CurrencyCode,
    /// Shipping and tax rules applied at checkout
    pub pricing: PricingRules,
    /// Inactivity lifetime of anonymous carts
    pub cart_ttl: chrono::Duration,
    /// Age at which unpaid pending orders are cancelled
    pub pending_order_ttl: chrono::Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            pricing: PricingRules {
                flat_shipping: Money::from_cents(999),
                free_shipping_threshold: Money::from_cents(10_000),
                tax_rate: Decimal::ZERO,
            },
            cart_ttl: chrono::Duration::days(7),
            pending_order_ttl: chrono::Duration::hours(24),
        }
    }
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    /// API base URL (e.g., <https://api.stripe.com/>)
    pub api_base: Url,
    /// API secret key
    pub secret_key: SecretString,
    /// Webhook signing secret
    pub webhook_secret: SecretString,
    /// Bound on every gateway call
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host: IpAddr = get_parsed("STOREFRONT_HOST", "127.0.0.1")?;
        let port: u16 = get_parsed("STOREFRONT_PORT", "3000")?;

        let store = StoreConfig::from_env()?;
        let payment = PaymentConfig::from_env()?;
        let notify_webhook_url = get_optional_env("NOTIFY_WEBHOOK_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    ConfigError::InvalidEnvVar("NOTIFY_WEBHOOK_URL".to_string(), e.to_string())
                })
            })
            .transpose()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            database_url,
            host,
            port,
            store,
            payment,
            notify_webhook_url,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StoreConfig {
    /// Load store rules from environment variables, with defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for unparsable or negative values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let currency: CurrencyCode = get_parsed("STORE_CURRENCY", "USD")?;
        let flat_shipping: Money = get_parsed("STORE_FLAT_SHIPPING", "9.99")?;
        let free_shipping_threshold: Money = get_parsed("STORE_FREE_SHIPPING_THRESHOLD", "100.00")?;
        let tax_rate: Decimal = get_parsed("STORE_TAX_RATE", "0")?;
        if tax_rate.is_sign_negative() || tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "STORE_TAX_RATE".to_string(),
                format!("must be in [0, 1) (got {tax_rate})"),
            ));
        }
        let cart_ttl_days: u16 = get_parsed("CART_TTL_DAYS", "7")?;
        let pending_ttl_hours: u16 = get_parsed("PENDING_ORDER_TTL_HOURS", "24")?;

        Ok(Self {
            currency,
            pricing: PricingRules {
                flat_shipping,
                free_shipping_threshold,
                tax_rate,
            },
            cart_ttl: chrono::Duration::days(i64::from(cart_ttl_days)),
            pending_order_ttl: chrono::Duration::hours(i64::from(pending_ttl_hours)),
        })
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base: Url = get_parsed("PAYMENT_API_BASE", "https://api.stripe.com/")?;
        let timeout_secs: u64 = get_parsed("PAYMENT_TIMEOUT_SECS", "10")?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            api_base,
            secret_key: get_validated_secret("PAYMENT_SECRET_KEY")?,
            webhook_secret: get_validated_secret("PAYMENT_WEBHOOK_SECRET")?,
            timeout: std::time::Duration::from_secs(timeout_secs),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn get_parsed<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-webhook-secret-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_gateway_style_secret() {
        let result = validate_secret_strength("whsec_9fK2xLq7Zb4Rt8Mn1Vc6Yp3Hd5", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_default_store_config() {
        let store = StoreConfig::default();
        assert_eq!(store.currency, CurrencyCode::USD);
        assert_eq!(store.cart_ttl, chrono::Duration::days(7));
        assert_eq!(store.pricing.flat_shipping, Money::from_cents(999));
    }

    #[test]
    fn test_socket_addr() {
        let config = StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            store: StoreConfig::default(),
            payment: PaymentConfig {
                api_base: Url::parse("https://api.stripe.com/").unwrap(),
                secret_key: SecretString::from("sk_test_value"),
                webhook_secret: SecretString::from("whsec_value"),
                timeout: std::time::Duration::from_secs(10),
            },
            notify_webhook_url: None,
            sentry_dsn: None,
        };

        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_payment_config_debug_redacts_secrets() {
        let config = PaymentConfig {
            api_base: Url::parse("https://api.stripe.com/").unwrap(),
            secret_key: SecretString::from("sk_live_super_secret_key"),
            webhook_secret: SecretString::from("whsec_super_secret_value"),
            timeout: std::time::Duration::from_secs(10),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("api.stripe.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk_live_super_secret_key"));
        assert!(!debug_output.contains("whsec_super_secret_value"));
    }
}
