//! Response construction.
//!
//! # Responsibilities
//! - Encode the envelope response (pass headers, pass status, `x-bare-*`)
//! - Apply the fixed CORS header set to every response
//! - Short-circuit `OPTIONS` pre-flights before any validation
//!
//! # Design Decisions
//! - Upstream bodies stream through untouched; only the head is rewritten
//! - Null-body upstream statuses ship an empty envelope body so the client
//!   never blocks on a body that cannot exist

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use hyper::body::Incoming;
use serde::Serialize;

use crate::error::BareError;
use crate::headers::{headers_to_bare, split_headers};
use crate::proto::ParsedRequest;

/// Statuses whose responses carry no body.
const NULL_BODY_STATUS: &[u16] = &[101, 204, 205, 304];

/// The fixed CORS set every response carries.
const CORS_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "*"),
    ("access-control-expose-headers", "*"),
    ("access-control-max-age", "7200"),
    ("x-robots-tag", "noindex"),
];

pub fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
}

/// Outermost middleware: pre-flights return 200 immediately, and every
/// other response (success or error) gains the CORS set on the way out.
pub async fn cors_middleware(req: Request<Body>, next: Next) -> axum::response::Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors(response.headers_mut());
        return response;
    }
    let mut response = next.run(req).await;
    apply_cors(response.headers_mut());
    response
}

/// Serialize a value as an `application/json` response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Encode the upstream response into the envelope reply.
pub fn build_envelope_response(
    parsed: &ParsedRequest,
    upstream: Response<Incoming>,
) -> Result<Response<Body>, BareError> {
    let upstream_status = upstream.status();
    let (parts, incoming) = upstream.into_parts();

    let mut headers = HeaderMap::new();
    for name in &parsed.pass_headers {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            for value in parts.headers.get_all(&header_name) {
                headers.append(header_name.clone(), value.clone());
            }
        }
    }

    let envelope_status = if parsed.pass_status.contains(&upstream_status.as_u16()) {
        upstream_status
    } else {
        StatusCode::OK
    };

    // A cache hit surfaces bare: the client reuses what it already has.
    if envelope_status != StatusCode::NOT_MODIFIED {
        headers.insert(
            HeaderName::from_static("x-bare-status"),
            HeaderValue::from_str(&upstream_status.as_u16().to_string())
                .expect("status code is a valid header value"),
        );
        headers.insert(
            HeaderName::from_static("x-bare-status-text"),
            HeaderValue::from_str(upstream_status.canonical_reason().unwrap_or(""))
                .expect("canonical reason is a valid header value"),
        );
        let bare = headers_to_bare(&parts.headers);
        let json = serde_json::to_string(&bare)?;
        if let Ok(value) = HeaderValue::from_bytes(json.as_bytes()) {
            headers.insert(HeaderName::from_static("x-bare-headers"), value);
        }
    }

    split_headers(&mut headers);

    let body = if NULL_BODY_STATUS.contains(&upstream_status.as_u16()) {
        Body::empty()
    } else {
        Body::new(incoming)
    };

    let mut builder = Response::builder().status(envelope_status);
    if let Some(response_headers) = builder.headers_mut() {
        *response_headers = headers;
    }
    builder
        .body(body)
        .map_err(|e| BareError::unknown("Error", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_set_is_complete() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("access-control-max-age").unwrap(), "7200");
        assert_eq!(headers.get("x-robots-tag").unwrap(), "noindex");
        assert_eq!(headers.len(), CORS_HEADERS.len());
    }
}
