//! Oversized `x-bare-headers` splitting.
//!
//! Front-end HTTP servers commonly cap a single header value around 8 KiB;
//! a serialized header payload can exceed that. Oversized values travel as
//! `x-bare-headers-0`, `x-bare-headers-1`, … chunks instead. Each chunk is
//! prefixed with `;` so middleboxes that trim empty-looking values cannot
//! corrupt a fragment boundary.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::BareError;

/// Maximum length of a single emitted header value.
pub const MAX_HEADER_VALUE: usize = 3072;

const BARE_HEADERS: &str = "x-bare-headers";

/// Split an oversized `x-bare-headers` value into indexed chunks in place.
/// Values at or under the limit are left alone.
pub fn split_headers(headers: &mut HeaderMap) {
    let Some(value) = headers.get(BARE_HEADERS) else {
        return;
    };
    if value.as_bytes().len() <= MAX_HEADER_VALUE {
        return;
    }

    let payload = value.as_bytes().to_vec();
    headers.remove(BARE_HEADERS);
    for (index, chunk) in payload.chunks(MAX_HEADER_VALUE).enumerate() {
        let mut fragment = Vec::with_capacity(chunk.len() + 1);
        fragment.push(b';');
        fragment.extend_from_slice(chunk);
        let name = HeaderName::from_bytes(format!("{BARE_HEADERS}-{index}").as_bytes())
            .expect("generated header name is valid");
        if let Ok(value) = HeaderValue::from_bytes(&fragment) {
            headers.insert(name, value);
        }
    }
}

/// Reassemble split `x-bare-headers-N` fragments into the single value.
/// Returns the joined payload, or the plain `x-bare-headers` value when the
/// request was not split, or `None` when neither form is present.
pub fn join_headers(headers: &HeaderMap) -> Result<Option<String>, BareError> {
    if headers.get(format!("{BARE_HEADERS}-0")).is_none() {
        return Ok(headers
            .get(BARE_HEADERS)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()));
    }

    let mut joined = String::new();
    let mut index = 0;
    while let Some(fragment) = headers.get(format!("{BARE_HEADERS}-{index}")) {
        let bytes = fragment.as_bytes();
        if bytes.first() != Some(&b';') {
            return Err(BareError::invalid_header(
                BARE_HEADERS,
                format!("Header chunk {index} was not joinable."),
            ));
        }
        joined.push_str(&String::from_utf8_lossy(&bytes[1..]));
        index += 1;
    }
    Ok(Some(joined))
}
