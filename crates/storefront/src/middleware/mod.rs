//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (hub per request, transaction capture)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//!
//! Caller identity is not a layer; handlers take the [`Caller`] extractor.

pub mod identity;
pub mod request_id;

pub use identity::{ADMIN_ID_HEADER, Caller, SESSION_TOKEN_HEADER, USER_ID_HEADER};
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
