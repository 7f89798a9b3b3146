//! Guardline Storefront library.
//!
//! This crate provides the order core of the storefront as a library:
//! inventory ledger, cart store, coupon engine, order orchestrator and
//! payment reconciler, plus the HTTP routes that expose them.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
