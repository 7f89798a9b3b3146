//! Shipping destination captured at checkout.

use serde::{Deserialize, Serialize};

/// Errors that can occur when validating [`ShippingInfo`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShippingError {
    /// A required field is missing or blank.
    #[error("{0} is required")]
    Missing(&'static str),
    /// A field exceeds its maximum length.
    #[error("{field} must be at most {max} characters")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
    /// The phone number contains characters other than digits and separators.
    #[error("phone number is invalid")]
    InvalidPhone,
    /// The country is not a two-letter ISO 3166 code.
    #[error("country must be a two-letter code")]
    InvalidCountry,
}

/// Where and to whom an order ships.
///
/// ## Constraints
///
/// - `full_name`, `line1`, `city`, `postal_code`, `phone` are required
/// - Free-text fields are at most 200 characters, postal code at most 20
/// - `country` is a two-letter code (e.g. `US`)
/// - `phone` holds digits plus `+ - ( ) .` and spaces, with 7 to 20 digits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    /// Recipient's full name.
    pub full_name: String,
    /// Contact phone for the carrier.
    pub phone: String,
    /// Street address.
    pub line1: String,
    /// Apartment, suite, unit.
    #[serde(default)]
    pub line2: Option<String>,
    /// City or locality.
    pub city: String,
    /// State, province or region.
    #[serde(default)]
    pub region: Option<String>,
    /// Postal or ZIP code.
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

const MAX_TEXT: usize = 200;
const MAX_POSTAL: usize = 20;

impl ShippingInfo {
    /// Check every field, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`ShippingError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ShippingError> {
        required("full_name", &self.full_name, MAX_TEXT)?;
        required("line1", &self.line1, MAX_TEXT)?;
        required("city", &self.city, MAX_TEXT)?;
        required("postal_code", &self.postal_code, MAX_POSTAL)?;
        required("phone", &self.phone, MAX_TEXT)?;

        if let Some(line2) = &self.line2 {
            bounded("line2", line2, MAX_TEXT)?;
        }
        if let Some(region) = &self.region {
            bounded("region", region, MAX_TEXT)?;
        }

        let country = self.country.trim();
        if country.is_empty() {
            return Err(ShippingError::Missing("country"));
        }
        if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ShippingError::InvalidCountry);
        }

        let phone_ok = self
            .phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | '.' | ' '));
        let digits = self.phone.chars().filter(char::is_ascii_digit).count();
        if !phone_ok || !(7..=20).contains(&digits) {
            return Err(ShippingError::InvalidPhone);
        }

        Ok(())
    }
}

fn required(field: &'static str, value: &str, max: usize) -> Result<(), ShippingError> {
    if value.trim().is_empty() {
        return Err(ShippingError::Missing(field));
    }
    bounded(field, value, max)
}

fn bounded(field: &'static str, value: &str, max: usize) -> Result<(), ShippingError> {
    if value.chars().count() > max {
        return Err(ShippingError::TooLong { field, max });
    }
    Ok(())
}
