//! Core types for Guardline.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod owner;
pub mod quantity;
pub mod shipping;
pub mod status;

pub use id::*;
pub use money::{CurrencyCode, Money, MoneyError};
pub use owner::{Actor, ActorParseError, Owner, SessionToken, SessionTokenError};
pub use quantity::{LineQuantity, QuantityError};
pub use shipping::{ShippingError, ShippingInfo};
pub use status::*;
