//! Cart line quantity.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a quantity is outside the allowed range.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("quantity must be between {min} and {max} (got {got})", min = LineQuantity::MIN, max = LineQuantity::MAX)]
pub struct QuantityError {
    /// The rejected value.
    pub got: u32,
}

/// Quantity of a single product on a cart line, always within `1..=10`.
///
/// Combining quantities never exceeds the maximum: [`LineQuantity::merge`]
/// sums and clamps.
///
/// ## Examples
///
/// ```
/// use guardline_core::LineQuantity;
///
/// let a = LineQuantity::new(4).unwrap();
/// let b = LineQuantity::new(9).unwrap();
/// assert_eq!(a.merge(b).get(), 10);
/// assert!(LineQuantity::new(0).is_err());
/// assert!(LineQuantity::new(11).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LineQuantity(u8);

impl LineQuantity {
    /// Smallest quantity a line can hold.
    pub const MIN: u32 = 1;
    /// Largest quantity a line can hold.
    pub const MAX: u32 = 10;

    /// Validate a requested quantity.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError`] if `quantity` is outside `1..=10`.
    pub fn new(quantity: u32) -> Result<Self, QuantityError> {
        if !(Self::MIN..=Self::MAX).contains(&quantity) {
            return Err(QuantityError { got: quantity });
        }
        u8::try_from(quantity)
            .map(Self)
            .map_err(|_| QuantityError { got: quantity })
    }

    /// The quantity as a plain integer.
    #[must_use]
    pub fn get(self) -> u32 {
        u32::from(self.0)
    }

    /// Sum two quantities, clamped to [`LineQuantity::MAX`].
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let max = u8::try_from(Self::MAX).unwrap_or(u8::MAX);
        Self(self.0.saturating_add(other.0).min(max))
    }
}

impl fmt::Display for LineQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for LineQuantity {
    type Error = QuantityError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LineQuantity> for u32 {
    fn from(q: LineQuantity) -> Self {
        q.get()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(LineQuantity::new(1).is_ok());
        assert!(LineQuantity::new(10).is_ok());
        assert_eq!(LineQuantity::new(0), Err(QuantityError { got: 0 }));
        assert_eq!(LineQuantity::new(11), Err(QuantityError { got: 11 }));
    }

    #[test]
    fn test_merge_clamps() {
        let four = LineQuantity::new(4).unwrap();
        let nine = LineQuantity::new(9).unwrap();
        let three = LineQuantity::new(3).unwrap();
        assert_eq!(four.merge(nine).get(), 10);
        assert_eq!(four.merge(three).get(), 7);
    }

    #[test]
    fn test_error_message() {
        let err = LineQuantity::new(42).unwrap_err();
        assert_eq!(err.to_string(), "quantity must be between 1 and 10 (got 42)");
    }

    #[test]
    fn test_deserialize_validates() {
        assert!(serde_json::from_str::<LineQuantity>("5").is_ok());
        assert!(serde_json::from_str::<LineQuantity>("0").is_err());
    }
}
