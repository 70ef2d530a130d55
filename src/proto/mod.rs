//! Envelope protocol versions.
//!
//! # Data Flow
//! ```text
//! inbound exchange
//!     → join split x-bare-headers fragments
//!     → per-version remote extraction (split tuple or x-bare-url)
//!     → parse send headers (strict string | [string])
//!     → gather forward headers from the inbound request
//!     → outbound fetch
//!     → envelope response encoding (pass headers, pass status, x-bare-*)
//! ```
//!
//! # Design Decisions
//! - v1 keeps its historically permissive forward list for client
//!   compatibility; v2/v3 reject forbidden names outright
//! - Forbidden send headers are stripped at the fetch layer instead of
//!   erroring, so a client that lists them still gets a working tunnel

pub mod v1;
pub mod v2;
pub mod v3;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::BareError;
use crate::headers::{canonical_name, BareHeaders, BareValue};
use crate::remote::Remote;

/// Header names that may never be copied from the inbound request.
pub const FORBIDDEN_FORWARD_HEADERS: &[&str] =
    &["connection", "transfer-encoding", "host", "origin", "referer"];

/// Response header names that may never be echoed at the envelope layer.
pub const FORBIDDEN_PASS_HEADERS: &[&str] = &["vary", "connection", "transfer-encoding"];

/// Forward defaults shared by every version.
pub const DEFAULT_FORWARD_HEADERS: &[&str] = &["accept-encoding", "accept-language"];

/// Extra forward defaults for the header-framed versions, which relay the
/// client's own WebSocket handshake material.
pub const DEFAULT_FORWARD_HEADERS_WS: &[&str] = &[
    "sec-websocket-extensions",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Response headers echoed at the envelope layer by default.
pub const DEFAULT_PASS_HEADERS: &[&str] = &["content-encoding", "content-length", "last-modified"];

/// Additional forwards in cache mode.
pub const CACHE_FORWARD_HEADERS: &[&str] = &["if-modified-since", "if-none-match", "cache-control"];

/// Additional passes in cache mode.
pub const CACHE_PASS_HEADERS: &[&str] = &["cache-control", "etag"];

/// Fully parsed envelope request, ready for the outbound fetch.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub remote: Remote,
    pub send_headers: BareHeaders,
    /// Lowercase response header names echoed at the envelope layer.
    pub pass_headers: Vec<String>,
    /// Upstream statuses surfaced as-is instead of normalized to 200.
    pub pass_status: Vec<u16>,
    /// Names the client asked to forward; kept for side-channel records that
    /// re-apply them at upgrade time.
    pub forward_headers: Vec<String>,
    pub cache: bool,
}

impl ParsedRequest {
    pub(crate) fn new(remote: Remote, send_headers: BareHeaders) -> Self {
        Self {
            remote,
            send_headers,
            pass_headers: DEFAULT_PASS_HEADERS.iter().map(|s| s.to_string()).collect(),
            pass_status: Vec::new(),
            forward_headers: Vec::new(),
            cache: false,
        }
    }

    /// Widen the forward/pass sets for `?cache` requests.
    pub(crate) fn enable_cache(&mut self) {
        self.cache = true;
        for name in CACHE_PASS_HEADERS {
            if !self.pass_headers.iter().any(|h| h == name) {
                self.pass_headers.push(name.to_string());
            }
        }
        if !self.pass_status.contains(&304) {
            self.pass_status.push(304);
        }
    }
}

/// Read a header as UTF-8, failing with `INVALID_BARE_HEADER`.
pub(crate) fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &str,
) -> Result<Option<&'a str>, BareError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| BareError::invalid_header(name, "Header contained invalid characters")),
    }
}

/// Read a required header, failing with `MISSING_BARE_HEADER`.
pub(crate) fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, BareError> {
    header_str(headers, name)?.ok_or_else(|| BareError::missing_header(name))
}

/// Copy the named inbound headers into the send set, preserving
/// capitalization and multi-value order. `enforce_forbidden` distinguishes
/// v2/v3 (reject) from v1 (permissive).
pub(crate) fn load_forwarded_headers(
    send_headers: &mut BareHeaders,
    names: &[String],
    inbound: &HeaderMap,
    enforce_forbidden: bool,
) -> Result<(), BareError> {
    for name in names {
        let lower = name.to_ascii_lowercase();
        if enforce_forbidden && FORBIDDEN_FORWARD_HEADERS.contains(&lower.as_str()) {
            return Err(BareError::forbidden_header(&lower));
        }
        let values: Vec<String> = inbound
            .get_all(&lower)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        let value = match values.len() {
            0 => continue,
            1 => BareValue::Single(values.into_iter().next().expect("one value")),
            _ => BareValue::Multi(values),
        };
        send_headers.insert(canonical_name(&lower), value);
    }
    Ok(())
}

/// Validate a pass-header list, normalizing to lowercase.
pub(crate) fn load_pass_headers(names: &[String]) -> Result<Vec<String>, BareError> {
    let mut out: Vec<String> = DEFAULT_PASS_HEADERS.iter().map(|s| s.to_string()).collect();
    for name in names {
        let lower = name.to_ascii_lowercase();
        if FORBIDDEN_PASS_HEADERS.contains(&lower.as_str()) || lower.starts_with("access-control-") {
            return Err(BareError::forbidden_header(&lower));
        }
        if !out.contains(&lower) {
            out.push(lower);
        }
    }
    Ok(out)
}

/// Render the send set as wire headers for the outbound request.
pub(crate) fn bare_to_header_map(send_headers: &BareHeaders) -> Result<HeaderMap, BareError> {
    let mut out = HeaderMap::new();
    for (name, value) in send_headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            BareError::invalid_header(
                "x-bare-headers",
                format!("Header {name} is not a valid header name."),
            )
        })?;
        for item in value.iter() {
            let header_value = HeaderValue::from_str(item).map_err(|_| {
                BareError::invalid_header(
                    "x-bare-headers",
                    format!("Header {name} contains an invalid value."),
                )
            })?;
            out.append(header_name.clone(), header_value);
        }
    }
    Ok(out)
}

/// Split a comma-separated header list into trimmed entries.
pub(crate) fn split_header_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_load_forwarded_enforcement() {
        let mut inbound = HeaderMap::new();
        inbound.insert("accept-language", HeaderValue::from_static("en"));
        inbound.insert("host", HeaderValue::from_static("proxy.example"));

        let mut send: BareHeaders = IndexMap::new();
        let names = vec!["host".to_string()];
        let err = load_forwarded_headers(&mut send, &names, &inbound, true).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN_BARE_HEADER");

        // v1 stays permissive.
        let mut send: BareHeaders = IndexMap::new();
        load_forwarded_headers(&mut send, &names, &inbound, false).unwrap();
        assert_eq!(
            send.get("Host"),
            Some(&BareValue::Single("proxy.example".into()))
        );
    }

    #[test]
    fn test_load_forwarded_skips_absent() {
        let inbound = HeaderMap::new();
        let mut send: BareHeaders = IndexMap::new();
        load_forwarded_headers(
            &mut send,
            &["accept-language".to_string()],
            &inbound,
            true,
        )
        .unwrap();
        assert!(send.is_empty());
    }

    #[test]
    fn test_pass_headers_forbidden() {
        for name in ["vary", "connection", "access-control-allow-origin"] {
            let err = load_pass_headers(&[name.to_string()]).unwrap_err();
            assert_eq!(err.code(), "FORBIDDEN_BARE_HEADER");
        }
        let ok = load_pass_headers(&["X-Custom".to_string()]).unwrap();
        assert!(ok.contains(&"x-custom".to_string()));
        assert!(ok.contains(&"content-encoding".to_string()));
    }

    #[test]
    fn test_bare_to_header_map_multi() {
        let mut send: BareHeaders = IndexMap::new();
        send.insert(
            "Cookie".into(),
            BareValue::Multi(vec!["a=1".into(), "b=2".into()]),
        );
        let map = bare_to_header_map(&send).unwrap();
        let values: Vec<&str> = map
            .get_all("cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, ["a=1", "b=2"]);
    }

    #[test]
    fn test_bare_to_header_map_rejects_bad_name() {
        let mut send: BareHeaders = IndexMap::new();
        send.insert("bad header".into(), BareValue::Single("x".into()));
        assert!(bare_to_header_map(&send).is_err());
    }

    #[test]
    fn test_split_header_list() {
        assert_eq!(
            split_header_list("a, b ,c,,"),
            vec!["a".to_string(), "b".into(), "c".into()]
        );
    }

    #[test]
    fn test_cache_widens_sets() {
        let remote = crate::remote::Remote::from_parts("http:", "example.com", "80", "/").unwrap();
        let mut parsed = ParsedRequest::new(remote, IndexMap::new());
        parsed.enable_cache();
        assert!(parsed.pass_headers.contains(&"etag".to_string()));
        assert!(parsed.pass_status.contains(&304));
        assert!(parsed.cache);
    }
}
