//! Request ID middleware for request tracing and correlation.
//!
//! Every request carries an id through logs, Sentry events and the response
//! headers. Ids from an upstream proxy are kept when they look sane, so a
//! payment webhook can be followed from the gateway's delivery log into ours.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest upstream id we accept.
const MAX_UPSTREAM_ID_LEN: usize = 128;

/// Pick the upstream id if it is short printable ASCII, otherwise mint one.
fn resolve_request_id(upstream: Option<&str>) -> String {
    upstream
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_UPSTREAM_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map_or_else(|| Uuid::new_v4().to_string(), String::from)
}

/// Middleware that ensures every request has a unique request ID.
///
/// The id is recorded in the current span, set as a Sentry tag and echoed
/// back in the `x-request-id` response header.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = resolve_request_id(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok()),
    );

    Span::current().record("request_id", &request_id);
    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", &request_id);
    });

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_id_kept() {
        assert_eq!(resolve_request_id(Some("cf-ray-8a1b2c")), "cf-ray-8a1b2c");
        assert_eq!(resolve_request_id(Some("  abc  ")), "abc");
    }

    #[test]
    fn test_bad_upstream_id_replaced() {
        for bad in [None, Some(""), Some("has space"), Some("é")] {
            let id = resolve_request_id(bad);
            assert!(Uuid::parse_str(&id).is_ok(), "{bad:?} -> {id}");
        }
        let long = "a".repeat(MAX_UPSTREAM_ID_LEN + 1);
        assert!(Uuid::parse_str(&resolve_request_id(Some(&long))).is_ok());
    }
}
