//! Guardline Core - Shared domain types.
//!
//! This crate provides the types used across all Guardline components:
//! - `storefront` - Cart, checkout, order lifecycle and payment reconciliation
//! - `cli` - Command-line tools for migrations and maintenance jobs
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, money, owners, quantities, statuses and
//!   shipping details

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
