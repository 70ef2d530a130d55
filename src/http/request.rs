//! Inbound request model.
//!
//! # Responsibilities
//! - Strip the mount prefix and expose the routing sub-path
//! - Detect cache mode and WebSocket upgrade intent
//! - Small typed accessors over the raw exchange
//!
//! # Design Decisions
//! - The axum `Request<Body>` stays the source of truth; these helpers read
//!   from it rather than copying the exchange into another type

use axum::body::Body;
use axum::http::{header, Method, Request, Uri};

/// Sub-path under the mount prefix, or `None` when the request does not
/// belong to this server.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
}

/// Whether the `?cache` marker is present in the query string.
pub fn has_cache_query(uri: &Uri) -> bool {
    uri.query()
        .map(|query| {
            query
                .split('&')
                .any(|pair| pair == "cache" || pair.starts_with("cache="))
        })
        .unwrap_or(false)
}

/// Whether the exchange asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    if req.method() != Method::GET {
        return false;
    }
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
