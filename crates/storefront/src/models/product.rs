//! Product fields owned by the order core.
//!
//! The catalog itself (descriptions, images, categories) is maintained
//! elsewhere; the core only reads pricing and availability and writes stock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use guardline_core::{Money, ProductId, ProductStatus};

/// A time-boxed sale price window (inclusive start, exclusive end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// When the sale starts.
    pub starts_at: DateTime<Utc>,
    /// When the sale ends.
    pub ends_at: DateTime<Utc>,
}

impl SaleWindow {
    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Unique product ID.
    pub id: ProductId,
    /// Display name, copied onto order items.
    pub name: String,
    /// Stock keeping unit.
    pub sku: String,
    /// Primary image URL, copied onto order items.
    pub image_url: Option<String>,
    /// Regular price.
    pub price: Money,
    /// Discounted price, effective only inside `sale_window`.
    pub sale_price: Option<Money>,
    /// When `sale_price` applies. A sale price without a window never applies.
    pub sale_window: Option<SaleWindow>,
    /// Units on hand.
    pub stock: u32,
    /// Stock level at or below which the product is reported as running low.
    pub low_stock_threshold: u32,
    /// Availability.
    pub status: ProductStatus,
    /// Units sold across all orders (net of cancellations).
    pub total_sold: u32,
    /// When the product was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Price a customer pays at `now`.
    #[must_use]
    pub fn effective_price(&self, now: DateTime<Utc>) -> Money {
        match (self.sale_price, self.sale_window) {
            (Some(sale), Some(window)) if window.contains(now) && sale < self.price => sale,
            _ => self.price,
        }
    }

    /// Whether the product can currently be added to a cart or ordered.
    #[must_use]
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active && self.stock > 0
    }

    /// Whether stock is at or below the low-stock threshold.
    #[must_use]
    pub const fn is_low_stock(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn product() -> Product {
        Product {
            id: ProductId::new(1),
            name: "Hard Hat".to_string(),
            sku: "HH-100".to_string(),
            image_url: None,
            price: Money::from_cents(2500),
            sale_price: Some(Money::from_cents(1999)),
            sale_window: None,
            stock: 10,
            low_stock_threshold: 3,
            status: ProductStatus::Active,
            total_sold: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sale_price_requires_window() {
        let p = product();
        assert_eq!(p.effective_price(Utc::now()), Money::from_cents(2500));
    }

    #[test]
    fn test_sale_price_inside_window() {
        let now = Utc::now();
        let mut p = product();
        p.sale_window = Some(SaleWindow {
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
        });
        assert_eq!(p.effective_price(now), Money::from_cents(1999));
        assert_eq!(
            p.effective_price(now + Duration::days(2)),
            Money::from_cents(2500)
        );
    }

    #[test]
    fn test_purchasable() {
        let mut p = product();
        assert!(p.is_purchasable());
        p.stock = 0;
        assert!(!p.is_purchasable());
        p.stock = 5;
        p.status = ProductStatus::Discontinued;
        assert!(!p.is_purchasable());
    }

    #[test]
    fn test_low_stock() {
        let mut p = product();
        assert!(!p.is_low_stock());
        p.stock = 3;
        assert!(p.is_low_stock());
    }
}
