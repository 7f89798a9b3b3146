//! Domain models for the storefront core.
//!
//! - [`product`] - Catalog fields the order core reads and writes (stock, price)
//! - [`cart`] - Mutable pre-checkout line items per owner
//! - [`coupon`] - Discount codes and their pricing rules
//! - [`order`] - Immutable order snapshot, pricing and the status state machine

pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;

pub use cart::{Cart, CartItem};
pub use coupon::{Coupon, CouponRejection, normalize_code};
pub use order::{
    NewOrder, Order, OrderItem, OrderLine, OrderTotals, PaymentChange, PaymentResult,
    PricingRules, StatusChange, StatusEntry, TransitionError,
};
pub use product::{Product, SaleWindow};
