//! Coupon engine: code validation, discount pricing and usage counting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use guardline_core::{CouponId, Money};

use crate::db::CouponRepository;
use crate::error::{AppError, ConflictKind, Result};
use crate::models::{CouponRejection, normalize_code};

/// A coupon validated against a subtotal.
///
/// A zero `discount_amount` means the subtotal is below the coupon's minimum
/// and the coupon should not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub code: String,
    pub discount_amount: Money,
}

impl AppliedCoupon {
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        !self.discount_amount.is_zero()
    }
}

#[derive(Clone)]
pub struct CouponEngine {
    coupons: Arc<dyn CouponRepository>,
}

impl CouponEngine {
    #[must_use]
    pub fn new(coupons: Arc<dyn CouponRepository>) -> Self {
        Self { coupons }
    }

    /// Look up `code` (case-insensitively) and price it against `subtotal`.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank code, or an inactive, not yet valid or
    ///   expired coupon
    /// - `NotFound` if no coupon has this code
    /// - `Conflict(CouponExhausted)` if the usage limit is reached
    #[instrument(skip(self), fields(subtotal = %subtotal))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> Result<AppliedCoupon> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(AppError::Validation("coupon code is required".to_string()));
        }

        let coupon = self
            .coupons
            .find_by_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("coupon {code}")))?;

        coupon.check_usable(now).map_err(|rejection| match rejection {
            CouponRejection::UsageLimitReached => ConflictKind::CouponExhausted {
                code: code.clone(),
            }
            .into(),
            other => AppError::Validation(other.to_string()),
        })?;

        let discount_amount = coupon.discount_for(subtotal);
        debug!(%code, discount = %discount_amount, "Coupon priced");

        Ok(AppliedCoupon {
            coupon_id: coupon.id,
            code,
            discount_amount,
        })
    }

    /// Count one use of the coupon.
    ///
    /// # Errors
    ///
    /// Returns `Conflict(CouponExhausted)` if the limit was reached by a
    /// concurrent order.
    #[instrument(skip(self, applied), fields(code = %applied.code))]
    pub async fn increment_usage(&self, applied: &AppliedCoupon) -> Result<()> {
        if self.coupons.increment_usage(applied.coupon_id).await? {
            Ok(())
        } else {
            Err(ConflictKind::CouponExhausted {
                code: applied.code.clone(),
            }
            .into())
        }
    }

    /// Give back a use counted for an order that failed to place.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the write fails.
    #[instrument(skip(self, applied), fields(code = %applied.code))]
    pub async fn release_usage(&self, applied: &AppliedCoupon) -> Result<()> {
        self.coupons.decrement_usage(applied.coupon_id).await?;
        Ok(())
    }
}
