//! Version 2: split remote tuple plus pass/forward extension headers, cache
//! mode, and the id-based WebSocket side-channel.

use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::http::{Request, Response, StatusCode, Uri};
use hyper::upgrade::OnUpgrade;

use crate::error::BareError;
use crate::fetch::upgrade::upgrade_fetch;
use crate::headers::{headers_to_bare, join_headers, parse_bare_headers};
use crate::http::request::has_cache_query;
use crate::http::response::{build_envelope_response, json_response};
use crate::http::server::AppState;
use crate::http::websocket::splice_sockets;
use crate::meta::{MetaResponse, MetaValue};
use crate::observability::metrics;
use crate::proto::{
    bare_to_header_map, header_str, load_forwarded_headers, load_pass_headers, required_header,
    split_header_list, ParsedRequest, CACHE_FORWARD_HEADERS, DEFAULT_FORWARD_HEADERS,
    DEFAULT_FORWARD_HEADERS_WS,
};
use crate::remote::Remote;

/// Parse the v2 envelope. Forward and pass lists are comma-separated and
/// checked against the forbidden sets.
fn read_headers(headers: &HeaderMap, cache: bool) -> Result<ParsedRequest, BareError> {
    let protocol = required_header(headers, "x-bare-protocol")?.to_string();
    let host = required_header(headers, "x-bare-host")?.to_string();
    let port = required_header(headers, "x-bare-port")?.to_string();
    let path = required_header(headers, "x-bare-path")?.to_string();
    let remote = Remote::from_parts(&protocol, &host, &port, &path)?;

    let joined = join_headers(headers)?
        .ok_or_else(|| BareError::missing_header("x-bare-headers"))?;
    let mut send_headers = parse_bare_headers(&joined)?;

    let mut forward: Vec<String> = DEFAULT_FORWARD_HEADERS
        .iter()
        .chain(DEFAULT_FORWARD_HEADERS_WS)
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

/// `ANY <prefix>v2/` — tunnel one HTTP(S) exchange.
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
    metrics::record_tunnel_request("v2", upstream.status().as_u16());
    tracing::debug!(host = %parsed.remote.host, status = %upstream.status(), "v2 tunnel");

    build_envelope_response(&parsed, upstream)
}

/// `ANY <prefix>v2/ws-new-meta` — parse the envelope and park it under a
/// fresh id for the coming upgrade.
pub async fn handle_new_meta(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Response<Body>, BareError> {
    let parsed = read_headers(headers, has_cache_query(uri))?;
    let id = state
        .meta
        .create(MetaValue {
            v: 2,
            response: None,
            remote: Some((&parsed.remote).into()),
            send_headers: Some(parsed.send_headers.clone()),
            forward_headers: Some(parsed.forward_headers.clone()),
        })
        .await?;
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from(id))
        .map_err(|e| BareError::unknown("Error", e.to_string()))
}

/// `GET <prefix>v2/` with upgrade intent — relay a WebSocket session whose
/// envelope was parked by `ws-new-meta`.
pub async fn handle_upgrade(
    state: &AppState,
    mut req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let id = required_header(req.headers(), "sec-websocket-protocol")?
        .trim()
        .to_string();

    let value = state
        .meta
        .get(&id)
        .await?
        .filter(|value| value.v == 2)
        .ok_or_else(|| BareError::invalid_header("sec-websocket-protocol", "Unregistered ID"))?;
    let meta_remote = value
        .remote
        .ok_or_else(|| BareError::invalid_header("sec-websocket-protocol", "Incomplete meta"))?;
    let remote = Remote::from_parts(
        &meta_remote.protocol,
        &meta_remote.host,
        &meta_remote.port.to_string(),
        &meta_remote.path,
    )?;

    let mut send_headers = value.send_headers.unwrap_or_default();
    let forward = value.forward_headers.unwrap_or_default();
    load_forwarded_headers(&mut send_headers, &forward, req.headers(), true)?;

    let on_upgrade = req
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(|| BareError::unknown("Error", "Connection is not upgradeable"))?;

    let headers = bare_to_header_map(&send_headers)?;
    let outcome = upgrade_fetch(&state.outbound, &remote, headers).await?;

    state
        .meta
        .update(
            &id,
            MetaValue {
                v: 2,
                response: Some(MetaResponse {
                    status: Some(outcome.status.as_u16()),
                    status_text: Some(
                        outcome
                            .status
                            .canonical_reason()
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    headers: headers_to_bare(&outcome.headers),
                }),
                remote: None,
                send_headers: None,
                forward_headers: None,
            },
        )
        .await?;

    tracing::debug!(host = %remote.host, "v2 WebSocket relay starting");
    tokio::spawn(splice_sockets(
        on_upgrade,
        outcome.upgraded,
        state.shutdown.subscribe(),
        "v2",
    ));

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("upgrade", "websocket")
        .header("connection", "Upgrade")
        .header("sec-websocket-protocol", id);
    for echoed in ["sec-websocket-accept", "sec-websocket-extensions"] {
        if let Some(value) = outcome.headers.get(echoed) {
            builder = builder.header(echoed, value.clone());
        }
    }
    builder
        .body(Body::empty())
        .map_err(|e| BareError::unknown("Error", e.to_string()))
}

/// `ANY <prefix>v2/ws-meta` — consume a record, returning the remote's
/// handshake outcome.
pub async fn handle_get_meta(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let id = required_header(req.headers(), "x-bare-id")?;
    let value = state
        .meta
        .take(id, 2)
        .await?
        .ok_or_else(|| BareError::invalid_header("x-bare-id", "Unregistered ID"))?;
    let response = value.response.unwrap_or_else(|| MetaResponse {
        status: None,
        status_text: None,
        headers: Default::default(),
    });
    Ok(json_response(StatusCode::OK, &response))
}
