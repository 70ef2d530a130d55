//! Version 1: remote tuple split across headers, JSON forward list, and the
//! subprotocol-smuggled WebSocket connect payload.

use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::http::{Request, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use serde::Deserialize;
use serde_json::json;

use crate::error::BareError;
use crate::fetch::upgrade::upgrade_fetch;
use crate::headers::codec::decode_protocol;
use crate::headers::{headers_to_bare, join_headers, parse_bare_headers, BareHeaders};
use crate::http::response::{build_envelope_response, json_response};
use crate::http::server::AppState;
use crate::http::websocket::splice_sockets;
use crate::meta::{MetaResponse, MetaValue};
use crate::observability::metrics;
use crate::proto::{
    bare_to_header_map, load_forwarded_headers, required_header, ParsedRequest,
    DEFAULT_FORWARD_HEADERS, DEFAULT_FORWARD_HEADERS_WS,
};
use crate::remote::Remote;

/// Parse the v1 envelope. Every header is required, including the forward
/// list; the forward set stays permissive for client compatibility.
fn read_headers(headers: &HeaderMap) -> Result<ParsedRequest, BareError> {
    let protocol = required_header(headers, "x-bare-protocol")?.to_string();
    let host = required_header(headers, "x-bare-host")?.to_string();
    let port = required_header(headers, "x-bare-port")?.to_string();
    let path = required_header(headers, "x-bare-path")?.to_string();
    let remote = Remote::from_parts(&protocol, &host, &port, &path)?;

    let joined = join_headers(headers)?
        .ok_or_else(|| BareError::missing_header("x-bare-headers"))?;
    let mut send_headers = parse_bare_headers(&joined)?;

    let forward_raw = required_header(headers, "x-bare-forward-headers")?;
    let mut forward: Vec<String> = serde_json::from_str(forward_raw).map_err(|_| {
        BareError::invalid_header(
            "x-bare-forward-headers",
            "Header was not a valid JSON array of strings",
        )
    })?;
    forward.extend(
        DEFAULT_FORWARD_HEADERS
            .iter()
            .chain(DEFAULT_FORWARD_HEADERS_WS)
            .map(|s| s.to_string()),
    );
    load_forwarded_headers(&mut send_headers, &forward, headers, false)?;

    let mut parsed = ParsedRequest::new(remote, send_headers);
    parsed.forward_headers = forward;
    Ok(parsed)
}

/// `ANY <prefix>v1/` — tunnel one HTTP(S) exchange.
pub async fn handle_request(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let parsed = read_headers(req.headers())?;
    let (parts, body) = req.into_parts();
    let headers = bare_to_header_map(&parsed.send_headers)?;

    let upstream = state
        .outbound
        .bare_fetch(parts.method, &parsed.remote, headers, body)
        .await?;
    metrics::record_tunnel_request("v1", upstream.status().as_u16());
    tracing::debug!(host = %parsed.remote.host, status = %upstream.status(), "v1 tunnel");

    build_envelope_response(&parsed, upstream)
}

/// Subprotocol payload: `Sec-WebSocket-Protocol: bare, <encoded JSON>`.
#[derive(Debug, Deserialize)]
struct ConnectPayload {
    remote: PayloadRemote,
    headers: BareHeaders,
    #[serde(default)]
    forward_headers: Vec<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadRemote {
    host: String,
    port: PortField,
    path: String,
    protocol: String,
}

/// Clients serialize the port as either a number or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u32),
    Text(String),
}

impl PortField {
    fn as_string(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// `GET <prefix>v1/` with upgrade intent — relay a WebSocket session.
pub async fn handle_upgrade(
    state: &AppState,
    mut req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let protocol_header = required_header(req.headers(), "sec-websocket-protocol")?;
    let (label, payload) = protocol_header.split_once(',').ok_or_else(|| {
        BareError::invalid_header("sec-websocket-protocol", "Expected 'bare' and a payload")
    })?;
    if label.trim() != "bare" {
        return Err(BareError::invalid_header(
            "sec-websocket-protocol",
            "Unregistered subprotocol",
        ));
    }

    let decoded = decode_protocol(payload.trim());
    let connect: ConnectPayload = serde_json::from_str(&decoded).map_err(|e| {
        BareError::invalid_header("sec-websocket-protocol", format!("Invalid payload. ({e})"))
    })?;
    let remote = Remote::from_parts(
        &connect.remote.protocol,
        &connect.remote.host,
        &connect.remote.port.as_string(),
        &connect.remote.path,
    )?;

    let mut send_headers = connect.headers;
    let mut forward = connect.forward_headers;
    forward.extend(
        DEFAULT_FORWARD_HEADERS
            .iter()
            .chain(DEFAULT_FORWARD_HEADERS_WS)
            .map(|s| s.to_string()),
    );
    load_forwarded_headers(&mut send_headers, &forward, req.headers(), false)?;

    let on_upgrade = req
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(|| BareError::unknown("Error", "Connection is not upgradeable"))?;

    let headers = bare_to_header_map(&send_headers)?;
    let outcome = upgrade_fetch(&state.outbound, &remote, headers).await?;

    // The side-channel record lets the client poll the handshake headers.
    if let Some(id) = connect.id {
        state
            .meta
            .update(
                &id,
                MetaValue {
                    v: 1,
                    response: Some(MetaResponse {
                        status: None,
                        status_text: None,
                        headers: headers_to_bare(&outcome.headers),
                    }),
                    remote: None,
                    send_headers: None,
                    forward_headers: None,
                },
            )
            .await?;
    }

    tracing::debug!(host = %remote.host, "v1 WebSocket relay starting");
    tokio::spawn(splice_sockets(
        on_upgrade,
        outcome.upgraded,
        state.shutdown.subscribe(),
        "v1",
    ));

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("upgrade", "websocket")
        .header("connection", "Upgrade")
        .header("sec-websocket-protocol", "bare");
    for echoed in ["sec-websocket-accept", "sec-websocket-extensions"] {
        if let Some(value) = outcome.headers.get(echoed) {
            builder = builder.header(echoed, value.clone());
        }
    }
    builder
        .body(Body::empty())
        .map_err(|e| BareError::unknown("Error", e.to_string()))
}

/// `ANY <prefix>v1/ws-new-meta` — allocate a side-channel record.
pub async fn handle_new_meta(state: &AppState) -> Result<Response<Body>, BareError> {
    let id = state
        .meta
        .create(MetaValue {
            v: 1,
            response: None,
            remote: None,
            send_headers: None,
            forward_headers: None,
        })
        .await?;
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from(id))
        .map_err(|e| BareError::unknown("Error", e.to_string()))
}

/// `ANY <prefix>v1/ws-meta` — consume a record, returning the remote's
/// handshake headers.
pub async fn handle_get_meta(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let id = required_header(req.headers(), "x-bare-id")?;
    let value = state
        .meta
        .take(id, 1)
        .await?
        .ok_or_else(|| BareError::invalid_header("x-bare-id", "Unregistered ID"))?;
    let headers = value
        .response
        .map(|response| response.headers)
        .unwrap_or_default();
    Ok(json_response(StatusCode::OK, &json!({ "headers": headers })))
}
