//! Raw HTTP/1.1 upgrade fetch for the v1/v2 WebSocket relays.
//!
//! The relay splices bytes between the client and the remote after the
//! handshake, so the remote socket must be owned outright. A dedicated
//! HTTP/1.1 handshake (with upgrades enabled) gives us the 101 response
//! head plus the upgraded I/O; the pooled client is never involved.

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;

use crate::error::BareError;
use crate::fetch::{OutboundClient, FORBIDDEN_SEND_HEADERS};
use crate::remote::Remote;

/// How long the remote may take to answer the upgrade request.
pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(12);

/// Result of a successful remote upgrade: the 101 response head and the
/// upgraded byte stream.
pub struct UpgradeOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub upgraded: Upgraded,
}

/// Perform the outbound WebSocket upgrade request. Only the scheme is
/// translated (`ws` → `http`, `wss` → `https`); headers pass through as
/// supplied, minus the forbidden send set.
pub async fn upgrade_fetch(
    client: &OutboundClient,
    remote: &Remote,
    mut headers: HeaderMap,
) -> Result<UpgradeOutcome, BareError> {
    let url = remote.to_url()?;
    client.policy().filter_remote(&url)?;

    for name in FORBIDDEN_SEND_HEADERS {
        headers.remove(*name);
    }
    if !headers.contains_key(header::HOST) {
        if let Ok(value) = remote.authority().parse() {
            headers.insert(header::HOST, value);
        }
    }
    // The upgrade intent must survive regardless of what the client listed.
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));

    let stream = client.connect_stream(remote).await?;
    let secure = remote.protocol.is_secure();

    let mut sender = if secure {
        let server_name = ServerName::try_from(remote.host.clone())
            .map_err(|_| BareError::invalid_header("x-bare-host", "Invalid TLS server name"))?;
        let tls = client
            .tls()
            .connect(server_name, stream)
            .await
            .map_err(|e| BareError::from_io(&e))?;
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| BareError::from_transport(&e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "Upgrade connection closed");
            }
        });
        sender
    } else {
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| BareError::from_transport(&e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "Upgrade connection closed");
            }
        });
        sender
    };

    let mut builder = Request::builder().method(Method::GET).uri(remote.path.as_str());
    if let Some(request_headers) = builder.headers_mut() {
        *request_headers = headers;
    }
    let request = builder
        .body(Empty::<Bytes>::new())
        .map_err(|e| BareError::unknown("Error", e.to_string()))?;

    let response = tokio::time::timeout(UPGRADE_TIMEOUT, sender.send_request(request))
        .await
        .map_err(|_| BareError::ConnectionTimeout)?
        .map_err(|e| BareError::from_transport(&e))?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        // The remote answered with a plain response; there is nothing to
        // relay. Dropping the response tears the connection down.
        return Err(BareError::unknown(
            "Error",
            format!("Remote did not upgrade (status {})", response.status()),
        ));
    }

    let status = response.status();
    let response_headers = response.headers().clone();
    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| BareError::from_transport(&e))?;

    Ok(UpgradeOutcome {
        status,
        headers: response_headers,
        upgraded,
    })
}
