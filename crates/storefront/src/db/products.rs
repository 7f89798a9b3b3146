//! Product stock and availability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use guardline_core::{Money, ProductId, ProductStatus};

use super::{RepositoryError, non_negative, to_db_count};
use crate::models::{Product, SaleWindow};

/// Storage for the product fields the order core owns.
///
/// `reserve_stock` and `release_stock` must each be a single atomic
/// conditional write. Callers never read stock and then write it back.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Load one product.
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Load several products. Missing ids are absent from the result.
    async fn get_many(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError>;

    /// Decrement stock by `quantity` if the product is active and has at least
    /// that much stock. Also adds `quantity` to `total_sold` and flips the
    /// status to `out_of_stock` when stock reaches zero.
    ///
    /// Returns the updated product, or `None` if the condition did not hold.
    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError>;

    /// Increment stock by `quantity`, take it back off `total_sold` (floored at
    /// zero) and flip `out_of_stock` back to `active`.
    ///
    /// Returns the updated product, or `None` if it no longer exists.
    async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    sku: String,
    image_url: Option<String>,
    price: Money,
    sale_price: Option<Money>,
    sale_starts_at: Option<DateTime<Utc>>,
    sale_ends_at: Option<DateTime<Utc>>,
    stock: i32,
    low_stock_threshold: i32,
    status: ProductStatus,
    total_sold: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let sale_window = match (row.sale_starts_at, row.sale_ends_at) {
            (Some(starts_at), Some(ends_at)) => Some(SaleWindow { starts_at, ends_at }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            sku: row.sku,
            image_url: row.image_url,
            price: row.price,
            sale_price: row.sale_price,
            sale_window,
            stock: non_negative(row.stock, "stock")?,
            low_stock_threshold: non_negative(row.low_stock_threshold, "low_stock_threshold")?,
            status: row.status,
            total_sold: non_negative(row.total_sold, "total_sold")?,
            updated_at: row.updated_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, name, sku, image_url, price, sale_price, sale_starts_at, \
     sale_ends_at, stock, low_stock_threshold, status, total_sold, updated_at";

/// `PostgreSQL` product repository.
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM store.products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    async fn get_many(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let raw: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM store.products WHERE id = ANY($1)"
        ))
        .bind(raw)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            r"
            UPDATE store.products
            SET stock = stock - $2,
                total_sold = total_sold + $2,
                status = CASE WHEN stock - $2 = 0 THEN 'out_of_stock'::store.product_status
                              ELSE status END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND stock >= $2
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(to_db_count(quantity)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            r"
            UPDATE store.products
            SET stock = stock + $2,
                total_sold = GREATEST(total_sold - $2, 0),
                status = CASE WHEN status = 'out_of_stock' AND stock + $2 > 0
                              THEN 'active'::store.product_status
                              ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(to_db_count(quantity)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }
}
