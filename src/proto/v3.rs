//! Version 3: single-URL envelope and the in-band WebSocket connect frame.

use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::header::HeaderMap;
use axum::http::{Request, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::BareError;
use crate::fetch::websocket::websocket_fetch;
use crate::headers::{join_headers, parse_bare_headers, BareHeaders};
use crate::http::request::has_cache_query;
use crate::http::response::build_envelope_response;
use crate::http::server::AppState;
use crate::http::websocket::relay_messages;
use crate::observability::metrics;
use crate::proto::{
    bare_to_header_map, header_str, load_forwarded_headers, load_pass_headers, required_header,
    split_header_list, ParsedRequest, CACHE_FORWARD_HEADERS, DEFAULT_FORWARD_HEADERS,
    FORBIDDEN_FORWARD_HEADERS,
};
use crate::remote::Remote;

/// How long the client may take to send its connect frame.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse the v3 envelope: one URL header instead of the split tuple.
fn read_headers(headers: &HeaderMap, cache: bool) -> Result<ParsedRequest, BareError> {
    let raw_url = required_header(headers, "x-bare-url")?;
    let url = Url::parse(raw_url)
        .map_err(|e| BareError::invalid_header("x-bare-url", format!("Invalid URL. ({e})")))?;
    let remote = Remote::from_url(&url)?;

    let joined = join_headers(headers)?
        .ok_or_else(|| BareError::missing_header("x-bare-headers"))?;
    let mut send_headers = parse_bare_headers(&joined)?;

    let mut forward: Vec<String> = DEFAULT_FORWARD_HEADERS
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(listed) = header_str(headers, "x-bare-forward-headers")? {
        forward.extend(split_header_list(listed));
    }
    if cache {
        forward.extend(CACHE_FORWARD_HEADERS.iter().map(|s| s.to_string()));
    }
    load_forwarded_headers(&mut send_headers, &forward, headers, true)?;

    let pass = match header_str(headers, "x-bare-pass-headers")? {
        Some(listed) => load_pass_headers(&split_header_list(listed))?,
        None => load_pass_headers(&[])?,
    };

    let mut pass_status = Vec::new();
    if let Some(listed) = header_str(headers, "x-bare-pass-status")? {
        for entry in split_header_list(listed) {
            let status: u16 = entry.parse().map_err(|_| {
                BareError::invalid_header(
                    "x-bare-pass-status",
                    "Header was not a valid comma-separated list of integers",
                )
            })?;
            pass_status.push(status);
        }
    }

    let mut parsed = ParsedRequest::new(remote, send_headers);
    parsed.pass_headers = pass;
    parsed.pass_status = pass_status;
    parsed.forward_headers = forward;
    if cache {
        parsed.enable_cache();
    }
    Ok(parsed)
}

/// `ANY <prefix>v3/` — tunnel one HTTP(S) exchange.
pub async fn handle_request(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let parsed = read_headers(req.headers(), has_cache_query(req.uri()))?;
    let (parts, body) = req.into_parts();
    let headers = bare_to_header_map(&parsed.send_headers)?;

    let upstream = state
        .outbound
        .bare_fetch(parts.method, &parsed.remote, headers, body)
        .await?;
    metrics::record_tunnel_request("v3", upstream.status().as_u16());
    tracing::debug!(host = %parsed.remote.host, status = %upstream.status(), "v3 tunnel");

    build_envelope_response(&parsed, upstream)
}

/// First client frame on a v3 socket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectMessage {
    #[serde(rename = "type")]
    kind: String,
    remote: String,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    headers: BareHeaders,
    #[serde(default)]
    forward_headers: Vec<String>,
}

/// Server reply once the remote handshake completes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    protocol: String,
    set_cookies: Vec<String>,
}

/// `GET <prefix>v3/` with upgrade intent — upgrade the client first, then
/// wait for its connect frame.
pub async fn handle_upgrade(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let (mut parts, _body) = req.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|e| BareError::unknown("Error", e.to_string()))?;

    let inbound_headers = parts.headers.clone();
    let state = state.clone();
    Ok(upgrade.on_upgrade(move |socket| session(state, inbound_headers, socket)))
}

async fn session(state: AppState, inbound_headers: HeaderMap, mut socket: WebSocket) {
    match connect(&state, &inbound_headers, &mut socket).await {
        Ok(remote_socket) => {
            relay_messages(socket, remote_socket, state.shutdown.subscribe()).await;
        }
        Err(e) => {
            tracing::debug!(error = %e, "v3 WebSocket connect failed");
            let _ = socket.send(Message::Close(None)).await;
        }
    }
}

async fn connect(
    state: &AppState,
    inbound_headers: &HeaderMap,
    socket: &mut WebSocket,
) -> Result<crate::fetch::websocket::RemoteSocket, BareError> {
    let frame = tokio::time::timeout(CONNECT_TIMEOUT, socket.recv())
        .await
        .map_err(|_| BareError::ConnectionTimeout)?
        .ok_or_else(|| BareError::unknown("Error", "Socket closed before connect"))?
        .map_err(|e| BareError::unknown("Error", e.to_string()))?;

    let text = match frame {
        Message::Text(text) => text,
        _ => {
            return Err(BareError::unknown(
                "TypeError",
                "The first message was not a text frame",
            ))
        }
    };
    let connect: ConnectMessage = serde_json::from_str(text.as_str())?;
    if connect.kind != "connect" {
        return Err(BareError::unknown(
            "TypeError",
            "The first message was not a connect message",
        ));
    }

    let url = Url::parse(&connect.remote)
        .map_err(|e| BareError::invalid_header("x-bare-url", format!("Invalid URL. ({e})")))?;
    let remote = Remote::from_url(&url)?;
    if !remote.protocol.is_websocket() {
        return Err(BareError::invalid_header("x-bare-url", "Invalid protocol"));
    }

    let mut send_headers = connect.headers;
    let forward: Vec<String> = DEFAULT_FORWARD_HEADERS
        .iter()
        .map(|s| s.to_string())
        .chain(
            connect
                .forward_headers
                .into_iter()
                // Mid-socket there is no 400 to send; forbidden names drop.
                .filter(|name| {
                    !FORBIDDEN_FORWARD_HEADERS.contains(&name.to_ascii_lowercase().as_str())
                }),
        )
        .collect();
    load_forwarded_headers(&mut send_headers, &forward, inbound_headers, false)?;

    let (response, remote_socket) =
        websocket_fetch(&state.outbound, &remote, &connect.protocols, &send_headers).await?;

    let protocol = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let set_cookies: Vec<String> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();

    metrics::record_tunnel_request("v3-ws", 101);
    tracing::debug!(host = %remote.host, %protocol, "v3 WebSocket relay starting");

    let open = OpenMessage {
        kind: "open",
        protocol,
        set_cookies,
    };
    let payload = serde_json::to_string(&open)?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| BareError::unknown("Error", e.to_string()))?;

    Ok(remote_socket)
}
