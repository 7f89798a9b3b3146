//! Discount coupons.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use guardline_core::{CouponId, DiscountKind, Money};

/// Why a coupon cannot be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    /// Disabled by a merchandiser.
    #[error("coupon is not active")]
    Inactive,
    /// Validity window has not opened yet.
    #[error("coupon is not valid yet")]
    NotStarted,
    /// Validity window has closed.
    #[error("coupon has expired")]
    Expired,
    /// `usage_count` has reached `usage_limit`.
    #[error("coupon usage limit reached")]
    UsageLimitReached,
}

/// A discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique coupon ID.
    pub id: CouponId,
    /// Code as entered by customers, stored uppercase.
    pub code: String,
    /// Percentage or fixed amount.
    pub kind: DiscountKind,
    /// Percentage points (`15` = 15%) or an amount in the store currency.
    pub value: Decimal,
    /// Cap on a percentage discount.
    pub maximum_discount: Option<Money>,
    /// Subtotal required for the coupon to apply.
    pub minimum_order_amount: Money,
    /// Start of validity (inclusive).
    pub starts_at: DateTime<Utc>,
    /// End of validity (inclusive).
    pub ends_at: DateTime<Utc>,
    /// Maximum number of orders that may use the coupon. `None` is unlimited.
    pub usage_limit: Option<u32>,
    /// Number of orders placed with the coupon.
    pub usage_count: u32,
    /// Merchandiser switch.
    pub is_active: bool,
}

/// Normalize a customer-entered code for case-insensitive lookup.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl Coupon {
    /// Check that the coupon can be used at `now`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CouponRejection`] that applies.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if now < self.starts_at {
            return Err(CouponRejection::NotStarted);
        }
        if now > self.ends_at {
            return Err(CouponRejection::Expired);
        }
        if self
            .usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
        {
            return Err(CouponRejection::UsageLimitReached);
        }
        Ok(())
    }

    /// Discount for `subtotal`.
    ///
    /// Zero when the subtotal is below the minimum order amount; otherwise
    /// never more than the subtotal.
    #[must_use]
    pub fn discount_for(&self, subtotal: Money) -> Money {
        if subtotal < self.minimum_order_amount {
            return Money::ZERO;
        }

        let raw = match self.kind {
            DiscountKind::Percentage => {
                let pct = subtotal.apply_rate(self.value / Decimal::ONE_HUNDRED);
                match self.maximum_discount {
                    Some(cap) if pct > cap => cap,
                    _ => pct,
                }
            }
            DiscountKind::FixedAmount => Money::new(self.value).unwrap_or(Money::ZERO),
        };

        raw.min(subtotal)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn coupon(kind: DiscountKind, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: CouponId::new(1),
            code: "SAFE10".to_string(),
            kind,
            value: Decimal::new(value, 0),
            maximum_discount: None,
            minimum_order_amount: Money::from_cents(5000),
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            usage_limit: Some(100),
            usage_count: 0,
            is_active: true,
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  safe10 "), "SAFE10");
    }

    #[test]
    fn test_minimum_boundary() {
        let c = coupon(DiscountKind::Percentage, 10);
        assert_eq!(c.discount_for(Money::from_cents(5000)), Money::from_cents(500));
        assert_eq!(c.discount_for(Money::from_cents(4999)), Money::ZERO);
    }

    #[test]
    fn test_percentage_cap() {
        let mut c = coupon(DiscountKind::Percentage, 50);
        c.maximum_discount = Some(Money::from_cents(2000));
        assert_eq!(
            c.discount_for(Money::from_cents(10_000)),
            Money::from_cents(2000)
        );
    }

    #[test]
    fn test_fixed_never_exceeds_subtotal() {
        let mut c = coupon(DiscountKind::FixedAmount, 80);
        c.minimum_order_amount = Money::ZERO;
        assert_eq!(c.discount_for(Money::from_cents(6000)), Money::from_cents(6000));
        assert_eq!(c.discount_for(Money::from_cents(10_000)), Money::from_cents(8000));
    }

    #[test]
    fn test_usability() {
        let now = Utc::now();
        let mut c = coupon(DiscountKind::Percentage, 10);
        assert_eq!(c.check_usable(now), Ok(()));

        c.is_active = false;
        assert_eq!(c.check_usable(now), Err(CouponRejection::Inactive));
        c.is_active = true;

        assert_eq!(
            c.check_usable(now - Duration::days(2)),
            Err(CouponRejection::NotStarted)
        );
        assert_eq!(
            c.check_usable(now + Duration::days(2)),
            Err(CouponRejection::Expired)
        );

        c.usage_count = 100;
        assert_eq!(c.check_usable(now), Err(CouponRejection::UsageLimitReached));

        c.usage_limit = None;
        assert_eq!(c.check_usable(now), Ok(()));
    }
}
