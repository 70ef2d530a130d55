//! WebSocket client connect for the v3 relay.
//!
//! Unlike v1/v2, the v3 relay speaks WebSocket frames on both legs, so the
//! remote side uses a real WebSocket client handshake. TCP dialing and TLS
//! stay under our control for address filtering.

use axum::http::HeaderValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::client::{generate_key, Response as WsResponse};
use tokio_tungstenite::tungstenite::http::Request as WsRequest;
use tokio_tungstenite::WebSocketStream;

use crate::error::BareError;
use crate::fetch::upgrade::UPGRADE_TIMEOUT;
use crate::fetch::OutboundClient;
use crate::headers::BareHeaders;
use crate::remote::Remote;
use rustls::pki_types::ServerName;

/// Object-safe I/O for the remote leg: plain TCP or TLS over TCP.
pub trait RemoteIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RemoteIo for T {}

/// The remote half of a v3 relay.
pub type RemoteSocket = WebSocketStream<Box<dyn RemoteIo>>;

/// Open a WebSocket connection to the remote, offering `protocols` and
/// sending `headers` on the handshake request.
pub async fn websocket_fetch(
    client: &OutboundClient,
    remote: &Remote,
    protocols: &[String],
    headers: &BareHeaders,
) -> Result<(WsResponse, RemoteSocket), BareError> {
    let url = remote.to_url()?;
    client.policy().filter_remote(&url)?;

    let mut builder = WsRequest::builder()
        .uri(url.as_str())
        .header("Host", remote.authority())
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key());
    if !protocols.is_empty() {
        builder = builder.header("Sec-WebSocket-Protocol", protocols.join(", "));
    }
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if crate::fetch::FORBIDDEN_SEND_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        // Handshake-owned headers were set above; client copies would
        // corrupt the upgrade.
        if matches!(
            lower.as_str(),
            "host" | "upgrade" | "sec-websocket-version" | "sec-websocket-key"
        ) {
            continue;
        }
        let flat = value.flatten();
        if HeaderValue::from_str(&flat).is_err() {
            return Err(BareError::invalid_header(
                "x-bare-headers",
                format!("Header {name} contains an invalid value."),
            ));
        }
        builder = builder.header(name.as_str(), flat);
    }
    let request = builder
        .body(())
        .map_err(|e| BareError::unknown("Error", e.to_string()))?;

    let stream = client.connect_stream(remote).await?;
    let stream: Box<dyn RemoteIo> = if remote.protocol.is_secure() {
        let server_name = ServerName::try_from(remote.host.clone())
            .map_err(|_| BareError::invalid_header("x-bare-url", "Invalid TLS server name"))?;
        let tls = client
            .tls()
            .connect(server_name, stream)
            .await
            .map_err(|e| BareError::from_io(&e))?;
        Box::new(tls)
    } else {
        Box::new(stream)
    };

    let handshake = tokio_tungstenite::client_async(request, stream);
    let (socket, response) = tokio::time::timeout(UPGRADE_TIMEOUT, handshake)
        .await
        .map_err(|_| BareError::ConnectionTimeout)?
        .map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Io(io) => BareError::from_io(&io),
            other => BareError::unknown("Error", other.to_string()),
        })?;

    Ok((response, socket))
}
