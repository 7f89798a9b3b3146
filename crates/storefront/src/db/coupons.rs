//! Coupon lookup and usage counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use guardline_core::{CouponId, DiscountKind, Money};

use super::{RepositoryError, non_negative};
use crate::models::Coupon;

/// Storage for coupons.
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Find a coupon by its normalized (uppercase) code.
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError>;

    /// Count one use, only while `usage_count < usage_limit`.
    ///
    /// Returns `false` if the limit was already reached.
    async fn increment_usage(&self, id: CouponId) -> Result<bool, RepositoryError>;

    /// Give back one use after an order that counted it failed to place.
    async fn decrement_usage(&self, id: CouponId) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: CouponId,
    code: String,
    kind: DiscountKind,
    value: Decimal,
    maximum_discount: Option<Money>,
    minimum_order_amount: Money,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    usage_limit: Option<i32>,
    usage_count: i32,
    is_active: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = RepositoryError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            code: row.code,
            kind: row.kind,
            value: row.value,
            maximum_discount: row.maximum_discount,
            minimum_order_amount: row.minimum_order_amount,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            usage_limit: row
                .usage_limit
                .map(|limit| non_negative(limit, "usage_limit"))
                .transpose()?,
            usage_count: non_negative(row.usage_count, "usage_count")?,
            is_active: row.is_active,
        })
    }
}

/// `PostgreSQL` coupon repository.
pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    /// Create a new coupon repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponRepository for PgCouponRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let row: Option<CouponRow> = sqlx::query_as(
            r"
            SELECT id, code, kind, value, maximum_discount, minimum_order_amount,
                   starts_at, ends_at, usage_limit, usage_count, is_active
            FROM store.coupons
            WHERE code = $1
            ",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    async fn increment_usage(&self, id: CouponId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE store.coupons
            SET usage_count = usage_count + 1
            WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn decrement_usage(&self, id: CouponId) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE store.coupons SET usage_count = GREATEST(usage_count - 1, 0) WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
