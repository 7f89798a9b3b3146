//! Order persistence.
//!
//! Orders are never deleted. Status and payment writes are compare-and-set
//! so that concurrent cancellations, webhook retries and admin updates cannot
//! both succeed against the same starting state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use guardline_core::{
    Actor, LineQuantity, Money, OrderId, OrderStatus, Owner, PaymentMethod, ProductId,
    SessionToken, ShippingInfo, UserId,
};

use super::{RepositoryError, map_unique_violation};
use crate::models::{
    NewOrder, Order, OrderItem, OrderTotals, PaymentChange, PaymentResult, StatusChange,
    StatusEntry,
};

/// Storage for orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order with its items and first history entry.
    async fn insert(&self, order: NewOrder) -> Result<Order, RepositoryError>;

    /// Load one order.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Orders placed by `owner`, newest first.
    async fn list_for_owner(&self, owner: &Owner) -> Result<Vec<Order>, RepositoryError>;

    /// Find the order a gateway payment intent was created for.
    async fn find_by_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Remember the gateway payment intent for an order.
    async fn set_payment_intent(&self, id: OrderId, intent_id: &str)
    -> Result<(), RepositoryError>;

    /// Apply a status change if the order is still in `change.from()`.
    ///
    /// Returns `false` if another writer moved the order first.
    async fn apply_transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<bool, RepositoryError>;

    /// Record a first payment if the order is still unpaid and in
    /// `change.from()`.
    ///
    /// Returns `false` if the order was paid or moved in the meantime.
    async fn record_payment(
        &self,
        id: OrderId,
        change: &PaymentChange,
    ) -> Result<bool, RepositoryError>;

    /// Unpaid pending orders created before `cutoff`.
    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError>;
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    user_id: Option<UserId>,
    session_token: Option<String>,
    shipping: Json<ShippingInfo>,
    payment_method: PaymentMethod,
    coupon_code: Option<String>,
    items_price: Money,
    shipping_price: Money,
    tax_price: Money,
    discount_amount: Money,
    total_price: Money,
    status: OrderStatus,
    is_paid: bool,
    paid_at: Option<DateTime<Utc>>,
    payment_intent_id: Option<String>,
    payment_result: Option<Json<PaymentResult>>,
    is_delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: OrderId,
    product_id: ProductId,
    name: String,
    sku: String,
    image_url: Option<String>,
    price: Money,
    quantity: i16,
    subtotal: Money,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    order_id: OrderId,
    status: OrderStatus,
    note: String,
    actor: String,
    created_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, session_token, shipping, payment_method, \
     coupon_code, items_price, shipping_price, tax_price, discount_amount, total_price, status, \
     is_paid, paid_at, payment_intent_id, payment_result, is_delivered, delivered_at, \
     created_at, updated_at";

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity)
            .ok()
            .and_then(|q| LineQuantity::new(q).ok())
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!("invalid item quantity: {}", row.quantity))
            })?;

        Ok(Self {
            product_id: row.product_id,
            name: row.name,
            sku: row.sku,
            image_url: row.image_url,
            price: row.price,
            quantity,
            subtotal: row.subtotal,
        })
    }
}

impl TryFrom<HistoryRow> for StatusEntry {
    type Error = RepositoryError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let actor: Actor = row.actor.parse().map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid actor in status history: {e}"))
        })?;

        Ok(Self {
            status: row.status,
            at: row.created_at,
            note: row.note,
            actor,
        })
    }
}

fn row_owner(
    user_id: Option<UserId>,
    session_token: Option<String>,
) -> Result<Owner, RepositoryError> {
    match (user_id, session_token) {
        (Some(user), None) => Ok(Owner::User(user)),
        (None, Some(token)) => SessionToken::parse(&token).map(Owner::Session).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid session token on order: {e}"))
        }),
        _ => Err(RepositoryError::DataCorruption(
            "order must have exactly one owner".to_owned(),
        )),
    }
}

fn assemble(
    row: OrderRow,
    items: Vec<OrderItem>,
    status_history: Vec<StatusEntry>,
) -> Result<Order, RepositoryError> {
    Ok(Order {
        id: row.id,
        order_number: row.order_number,
        owner: row_owner(row.user_id, row.session_token)?,
        items,
        shipping: row.shipping.0,
        payment_method: row.payment_method,
        coupon_code: row.coupon_code,
        totals: OrderTotals {
            items_price: row.items_price,
            shipping_price: row.shipping_price,
            tax_price: row.tax_price,
            discount_amount: row.discount_amount,
            total_price: row.total_price,
        },
        status: row.status,
        status_history,
        is_paid: row.is_paid,
        paid_at: row.paid_at,
        payment_intent_id: row.payment_intent_id,
        payment_result: row.payment_result.map(|json| json.0),
        is_delivered: row.is_delivered,
        delivered_at: row.delivered_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// `PostgreSQL` order repository.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load items and history for a batch of order rows.
    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i32> = rows.iter().map(|r| r.id.as_i32()).collect();

        let item_rows: Vec<OrderItemRow> = sqlx::query_as(
            r"
            SELECT order_id, product_id, name, sku, image_url, price, quantity, subtotal
            FROM store.order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let history_rows: Vec<HistoryRow> = sqlx::query_as(
            r"
            SELECT order_id, status, note, actor, created_at
            FROM store.order_status_history
            WHERE order_id = ANY($1)
            ORDER BY order_id, id
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            items
                .entry(row.order_id)
                .or_default()
                .push(OrderItem::try_from(row)?);
        }

        let mut history: HashMap<OrderId, Vec<StatusEntry>> = HashMap::new();
        for row in history_rows {
            history
                .entry(row.order_id)
                .or_default()
                .push(StatusEntry::try_from(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                assemble(
                    row,
                    items.remove(&id).unwrap_or_default(),
                    history.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn insert_history(
    conn: &mut PgConnection,
    id: OrderId,
    entry: &StatusEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO store.order_status_history (order_id, status, note, actor, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(id)
    .bind(entry.status)
    .bind(&entry.note)
    .bind(entry.actor.to_string())
    .bind(entry.at)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let (id,): (OrderId,) = sqlx::query_as(
            r"
            INSERT INTO store.orders (
                order_number, user_id, session_token, shipping, payment_method,
                coupon_id, coupon_code, items_price, shipping_price, tax_price,
                discount_amount, total_price, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13, $13)
            RETURNING id
            ",
        )
        .bind(&order.order_number)
        .bind(order.owner.user_id())
        .bind(order.owner.session_token().map(SessionToken::as_str))
        .bind(Json(&order.shipping))
        .bind(order.payment_method)
        .bind(order.coupon.as_ref().map(|(id, _)| *id))
        .bind(order.coupon.as_ref().map(|(_, code)| code.as_str()))
        .bind(order.totals.items_price)
        .bind(order.totals.shipping_price)
        .bind(order.totals.tax_price)
        .bind(order.totals.discount_amount)
        .bind(order.totals.total_price)
        .bind(order.created.at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "order number"))?;

        for (position, item) in order.items.iter().enumerate() {
            let position = i16::try_from(position)
                .map_err(|_| RepositoryError::Conflict("too many order items".to_owned()))?;
            let quantity = i16::try_from(item.quantity.get())
                .map_err(|_| RepositoryError::Conflict("item quantity out of range".to_owned()))?;

            sqlx::query(
                r"
                INSERT INTO store.order_items (
                    order_id, position, product_id, name, sku, image_url,
                    price, quantity, subtotal
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(id)
            .bind(position)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(&item.sku)
            .bind(item.image_url.as_deref())
            .bind(item.price)
            .bind(quantity)
            .bind(item.subtotal)
            .execute(&mut *tx)
            .await?;
        }

        insert_history(&mut *tx, id, &order.created).await?;
        tx.commit().await?;

        Ok(order.into_order(id))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM store.orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn list_for_owner(&self, owner: &Owner) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM store.orders
            WHERE user_id = $1 OR session_token = $2
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(owner.user_id())
        .bind(owner.session_token().map(SessionToken::as_str))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn find_by_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM store.orders WHERE payment_intent_id = $1"
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn set_payment_intent(
        &self,
        id: OrderId,
        intent_id: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE store.orders SET payment_intent_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(intent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "payment intent"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: OrderId,
        change: &StatusChange,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE store.orders
            SET status = $3,
                updated_at = $4,
                is_delivered = is_delivered OR $5,
                delivered_at = COALESCE($6, delivered_at)
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id)
        .bind(change.from())
        .bind(change.to())
        .bind(change.entry().at)
        .bind(change.delivered_at().is_some())
        .bind(change.delivered_at())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_history(&mut *tx, id, change.entry()).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_payment(
        &self,
        id: OrderId,
        change: &PaymentChange,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let new_status = change.status_change().map_or(change.from(), StatusChange::to);

        let result = sqlx::query(
            r"
            UPDATE store.orders
            SET is_paid = TRUE,
                paid_at = $3,
                payment_result = $4,
                status = $5,
                updated_at = $3
            WHERE id = $1 AND is_paid = FALSE AND status = $2
            ",
        )
        .bind(id)
        .bind(change.from())
        .bind(change.paid_at())
        .bind(Json(change.result()))
        .bind(new_status)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(status_change) = change.status_change() {
            insert_history(&mut *tx, id, status_change.entry()).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM store.orders
            WHERE status = 'pending' AND is_paid = FALSE AND created_at < $1
            ORDER BY created_at
            "
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}
