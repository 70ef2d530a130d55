//! Envelope header handling.
//!
//! # Data Flow
//! ```text
//! inbound x-bare-headers(-N) fragments
//!     → split.rs (rejoin)
//!     → serde_json → BareHeaders (order-preserving, Single | Multi values)
//!     → outbound request headers
//!
//! remote response headers
//!     → raw.rs (canonical-case raw names + lowercase map)
//!     → BareHeaders → serde_json → x-bare-headers
//!     → split.rs (chunk oversized values)
//! ```
//!
//! # Design Decisions
//! - `IndexMap` keeps JSON insertion order across the round trip
//! - Values are strictly `string | [string]`; anything else is rejected on
//!   ingress with `INVALID_BARE_HEADER`

pub mod codec;
pub mod raw;
pub mod split;

use axum::http::HeaderMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::BareError;

pub use raw::{canonical_name, map_headers_from_array, raw_header_names};
pub use split::{join_headers, split_headers, MAX_HEADER_VALUE};

/// A single header entry: one value, or an ordered sequence of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BareValue {
    Single(String),
    Multi(Vec<String>),
}

impl BareValue {
    /// RFC 7230 combining: array values join with `", "`.
    pub fn flatten(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Multi(values) => values.join(", "),
        }
    }

    /// Iterate the individual values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::Single(value) => std::slice::from_ref(value).iter(),
            Self::Multi(values) => values.iter(),
        }
        .map(String::as_str)
    }
}

impl From<String> for BareValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

/// Header map carried inside the envelope. Keys keep the case the peer
/// supplied; insertion order is preserved.
pub type BareHeaders = IndexMap<String, BareValue>;

/// Parse the joined `x-bare-headers` JSON, rejecting values that are neither
/// a string nor an array of strings.
pub fn parse_bare_headers(raw: &str) -> Result<BareHeaders, BareError> {
    serde_json::from_str::<BareHeaders>(raw)
        .map_err(|e| BareError::invalid_header("x-bare-headers", format!("Header was not a valid JSON object of string or string-array values. ({e})")))
}

/// Collapse a wire header map into `BareHeaders`, grouping repeated names
/// (in order) into `Multi` values and restoring canonical capitalization.
pub fn headers_to_bare(headers: &HeaderMap) -> BareHeaders {
    let mut lower: BareHeaders = IndexMap::new();
    let mut raw_pairs: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let name = name.as_str().to_string();
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        raw_pairs.push((canonical_name(&name), value.clone()));
        match lower.entry(name).or_insert_with(|| BareValue::Multi(Vec::new())) {
            BareValue::Multi(values) => values.push(value),
            BareValue::Single(_) => unreachable!("entries start as Multi"),
        }
    }
    // Single-valued entries collapse back to plain strings.
    for value in lower.values_mut() {
        if let BareValue::Multi(values) = value {
            if values.len() == 1 {
                *value = BareValue::Single(values.remove(0));
            }
        }
    }
    let names = raw_header_names(&raw_pairs);
    map_headers_from_array(&names, &lower)
}
