//! Cart persistence. One cart per owner; writes are last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use guardline_core::{Money, Owner, SessionToken, UserId};

use super::{RepositoryError, map_unique_violation};
use crate::models::{Cart, CartItem};

/// Storage for carts, keyed by owner.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Load the cart for `owner`, expired or not.
    async fn get(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError>;

    /// Insert or replace the cart for `cart.owner`.
    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError>;

    /// Delete the cart for `owner`. Returns whether one existed.
    async fn delete(&self, owner: &Owner) -> Result<bool, RepositoryError>;

    /// Delete the cart for `owner` and return what was deleted.
    ///
    /// Of several concurrent calls for the same owner at most one gets the cart.
    async fn take(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError>;

    /// Hand a session cart to `user` in one write, provided the user has no
    /// cart yet. The cart stops expiring.
    ///
    /// Returns `false` if there was no session cart or the user already has one.
    async fn reassign(
        &self,
        session: &SessionToken,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Delete every cart that expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct CartRow {
    user_id: Option<UserId>,
    session_token: Option<String>,
    items: Json<Vec<CartItem>>,
    coupon_code: Option<String>,
    discount_amount: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<CartRow> for Cart {
    type Error = RepositoryError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let owner = match (row.user_id, row.session_token) {
            (Some(user), None) => Owner::User(user),
            (None, Some(token)) => Owner::Session(SessionToken::parse(&token).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid session token in cart: {e}"))
            })?),
            _ => {
                return Err(RepositoryError::DataCorruption(
                    "cart must have exactly one owner".to_owned(),
                ));
            }
        };

        Ok(Self {
            owner,
            items: row.items.0,
            coupon_code: row.coupon_code,
            discount_amount: row.discount_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

fn owner_keys(owner: &Owner) -> (Option<UserId>, Option<&str>) {
    (owner.user_id(), owner.session_token().map(SessionToken::as_str))
}

/// `PostgreSQL` cart repository.
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn get(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError> {
        let (user_id, session_token) = owner_keys(owner);
        let row: Option<CartRow> = sqlx::query_as(
            r"
            SELECT user_id, session_token, items, coupon_code, discount_amount,
                   created_at, updated_at, expires_at
            FROM store.carts
            WHERE user_id = $1 OR session_token = $2
            ",
        )
        .bind(user_id)
        .bind(session_token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Cart::try_from).transpose()
    }

    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError> {
        let (user_id, session_token) = owner_keys(&cart.owner);
        let conflict_column = if cart.owner.is_anonymous() {
            "session_token"
        } else {
            "user_id"
        };

        sqlx::query(&format!(
            r"
            INSERT INTO store.carts (
                user_id, session_token, items, coupon_code, discount_amount,
                created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ({conflict_column}) DO UPDATE
            SET items = EXCLUDED.items,
                coupon_code = EXCLUDED.coupon_code,
                discount_amount = EXCLUDED.discount_amount,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            "
        ))
        .bind(user_id)
        .bind(session_token)
        .bind(Json(&cart.items))
        .bind(cart.coupon_code.as_deref())
        .bind(cart.discount_amount)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .bind(cart.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, owner: &Owner) -> Result<bool, RepositoryError> {
        let (user_id, session_token) = owner_keys(owner);
        let result = sqlx::query("DELETE FROM store.carts WHERE user_id = $1 OR session_token = $2")
            .bind(user_id)
            .bind(session_token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn take(&self, owner: &Owner) -> Result<Option<Cart>, RepositoryError> {
        let (user_id, session_token) = owner_keys(owner);
        let row: Option<CartRow> = sqlx::query_as(
            r"
            DELETE FROM store.carts
            WHERE user_id = $1 OR session_token = $2
            RETURNING user_id, session_token, items, coupon_code, discount_amount,
                      created_at, updated_at, expires_at
            ",
        )
        .bind(user_id)
        .bind(session_token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Cart::try_from).transpose()
    }

    async fn reassign(
        &self,
        session: &SessionToken,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE store.carts
            SET user_id = $2, session_token = NULL, expires_at = NULL, updated_at = $3
            WHERE session_token = $1
              AND NOT EXISTS (SELECT 1 FROM store.carts WHERE user_id = $2)
            ",
        )
        .bind(session.as_str())
        .bind(user)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // A concurrent login created the user cart between check and write.
            Err(e) => match map_unique_violation(e, "user cart") {
                RepositoryError::Conflict(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM store.carts WHERE expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
