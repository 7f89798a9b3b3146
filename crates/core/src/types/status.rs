//! Status enums and the order lifecycle transition table.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// ```text
/// pending -> confirmed -> processing -> shipped -> delivered
///    |           |            |            |
///    +--cancel---+            +--refund----+ (paid orders; also from confirmed)
/// ```
///
/// `delivered`, `cancelled` and `refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Position on the fulfilment track, `None` for the alternate terminals.
    const fn stage(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Processing => Some(2),
            Self::Shipped => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled | Self::Refunded => None,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// Whether the order may still be cancelled (fulfilment not started).
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether a paid order in this status may be refunded.
    #[must_use]
    pub const fn is_refundable(self) -> bool {
        matches!(self, Self::Confirmed | Self::Processing | Self::Shipped)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward moves along the fulfilment track may skip stages. Cancelling
    /// and refunding follow their own rules. Staying in place is never a
    /// transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match next {
            Self::Cancelled => self.is_cancellable(),
            Self::Refunded => self.is_refundable(),
            _ => match (self.stage(), next.stage()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    /// The snake_case name used in storage and APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Catalog availability of a product.
///
/// `OutOfStock` is managed by inventory: set when stock reaches zero and
/// cleared when stock is released. `Inactive` and `Discontinued` are set by
/// merchandisers and never overridden by inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.product_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
    Discontinued,
    OutOfStock,
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the payment gateway.
    Card,
    /// Paid to the courier; confirmed manually by an admin.
    CashOnDelivery,
}

impl PaymentMethod {
    /// Whether payment goes through the external gateway.
    #[must_use]
    pub const fn uses_gateway(self) -> bool {
        matches!(self, Self::Card)
    }
}

/// How a coupon computes its discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.discount_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is a percentage of the subtotal (e.g. `15` for 15%).
    Percentage,
    /// `value` is a fixed amount in the store currency.
    FixedAmount,
}
