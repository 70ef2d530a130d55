//! Case-preserving raw-header utilities.
//!
//! The HTTP stack lowercases header names on ingress. The envelope protocol
//! round-trips the remote's capitalization through `x-bare-headers`, so the
//! pipeline carries a raw `(name, value)` sequence alongside the
//! lowercase-keyed map and rebuilds the cased map from it.

use super::{BareHeaders, BareValue};
use indexmap::IndexMap;

/// Ordered distinct names from a raw header sequence. The first occurrence
/// of a name wins; comparison is case-insensitive, the original case is kept.
pub fn raw_header_names(raw: &[(String, String)]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (name, _) in raw {
        if !names.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
            names.push(name.clone());
        }
    }
    names
}

/// Rebuild a header map whose keys take their case from `raw_names` and
/// whose values come from the lowercase-keyed `map`.
pub fn map_headers_from_array(raw_names: &[String], map: &BareHeaders) -> BareHeaders {
    let mut out: BareHeaders = IndexMap::new();
    for name in raw_names {
        if let Some(value) = map.get(&name.to_ascii_lowercase()) {
            out.insert(name.clone(), value.clone());
        }
    }
    // Entries the raw sequence never mentioned keep their lowercase key.
    for (name, value) in map {
        if !out.keys().any(|seen| seen.eq_ignore_ascii_case(name)) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

/// Canonical HTTP/1.1 capitalization (`x-foo-bar` → `X-Foo-Bar`). The wire
/// stack hands us lowercase names; this recovers the conventional form the
/// remote almost certainly sent.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if upper_next {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper_next = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_raw_header_names_dedupes_first_wins() {
        let raw = seq(&[
            ("X-Foo", "1"),
            ("Set-Cookie", "a"),
            ("x-foo", "2"),
            ("Set-Cookie", "b"),
        ]);
        assert_eq!(raw_header_names(&raw), ["X-Foo", "Set-Cookie"]);
    }

    #[test]
    fn test_map_headers_restores_case() {
        let raw = seq(&[("X-Foo", "Bar"), ("ETag", "\"1\"")]);
        let names = raw_header_names(&raw);
        let mut lower: BareHeaders = IndexMap::new();
        lower.insert("x-foo".into(), BareValue::Single("Bar".into()));
        lower.insert("etag".into(), BareValue::Single("\"1\"".into()));

        let mapped = map_headers_from_array(&names, &lower);
        assert_eq!(mapped.get("X-Foo"), Some(&BareValue::Single("Bar".into())));
        assert_eq!(mapped.get("ETag"), Some(&BareValue::Single("\"1\"".into())));
        assert!(mapped.get("x-foo").is_none());
    }

    #[test]
    fn test_map_headers_keeps_unlisted_entries() {
        let names = vec!["X-Foo".to_string()];
        let mut lower: BareHeaders = IndexMap::new();
        lower.insert("x-foo".into(), BareValue::Single("1".into()));
        lower.insert("x-bar".into(), BareValue::Single("2".into()));

        let mapped = map_headers_from_array(&names, &lower);
        assert_eq!(mapped.get("X-Foo"), Some(&BareValue::Single("1".into())));
        assert_eq!(mapped.get("x-bar"), Some(&BareValue::Single("2".into())));
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("x-foo"), "X-Foo");
        assert_eq!(canonical_name("content-length"), "Content-Length");
        assert_eq!(canonical_name("etag"), "Etag");
        assert_eq!(canonical_name(""), "");
    }
}
