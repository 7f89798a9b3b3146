//! Inventory ledger: stock reservations with all-or-nothing batches.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use guardline_core::{ProductId, ProductStatus};

use crate::db::ProductRepository;
use crate::error::{AppError, ConflictKind, Result};
use crate::models::Product;

/// Stock held for one product by one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Reserves and releases product stock.
///
/// Every reservation is a single conditional write in the repository; the
/// ledger never reads stock and writes it back.
#[derive(Clone)]
pub struct InventoryLedger {
    products: Arc<dyn ProductRepository>,
}

impl InventoryLedger {
    #[must_use]
    pub fn new(products: Arc<dyn ProductRepository>) -> Self {
        Self { products }
    }

    /// Take `quantity` units of a product out of stock.
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero quantity
    /// - `NotFound` if the product does not exist
    /// - `Conflict(ProductUnavailable)` if it is inactive or discontinued
    /// - `Conflict(InsufficientStock)` if stock is below `quantity`
    #[instrument(skip(self), fields(product_id = %product_id, quantity))]
    pub async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<Product> {
        if quantity == 0 {
            return Err(AppError::Validation(
                "reservation quantity must be positive".to_string(),
            ));
        }

        if let Some(product) = self.products.reserve_stock(product_id, quantity).await? {
            if product.stock == 0 {
                info!(sku = %product.sku, "Product sold out");
            } else if product.is_low_stock() {
                warn!(sku = %product.sku, stock = product.stock, "Product stock is low");
            }
            return Ok(product);
        }

        // The conditional write refused; read the product only to explain why.
        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;

        let conflict = match product.status {
            ProductStatus::Inactive | ProductStatus::Discontinued => {
                ConflictKind::ProductUnavailable { product_id }
            }
            ProductStatus::Active | ProductStatus::OutOfStock => ConflictKind::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            },
        };
        Err(conflict.into())
    }

    /// Put `quantity` units back into stock.
    ///
    /// A product deleted since the reservation is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the write fails.
    #[instrument(skip(self), fields(product_id = %product_id, quantity))]
    pub async fn release(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Ok(());
        }
        if self
            .products
            .release_stock(product_id, quantity)
            .await?
            .is_none()
        {
            warn!("Released stock for a product that no longer exists");
        }
        Ok(())
    }

    /// Reserve every line, or none of them.
    ///
    /// On the first failure, reservations already granted by this call are
    /// released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the first line that could not be reserved.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve_all(&self, lines: &[Reservation]) -> Result<Vec<Reservation>> {
        let mut granted = Vec::with_capacity(lines.len());
        for line in lines {
            match self.reserve(line.product_id, line.quantity).await {
                Ok(_) => granted.push(*line),
                Err(e) => {
                    if !granted.is_empty() {
                        warn!(
                            failed_product_id = %line.product_id,
                            rolled_back = granted.len(),
                            "Reservation failed, releasing earlier lines"
                        );
                        self.release_all(&granted).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(granted)
    }

    /// Release every reservation, continuing past failures.
    ///
    /// Failures are logged at error level; they leave stock lower than it
    /// should be and need manual correction.
    pub async fn release_all(&self, reservations: &[Reservation]) {
        for r in reservations {
            if let Err(e) = self.release(r.product_id, r.quantity).await {
                error!(
                    product_id = %r.product_id,
                    quantity = r.quantity,
                    error = %e,
                    "Failed to release reserved stock"
                );
            }
        }
    }
}
