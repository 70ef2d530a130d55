//! Outbound request plumbing.
//!
//! # Responsibilities
//! - Shared keep-alive HTTP(S) client for tunnel fetches
//! - SSRF-checked TCP dialing and TLS wrapping for upgrade paths
//! - Transport error mapping onto protocol error codes
//!
//! # Design Decisions
//! - Plain fetches ride the pooled legacy client; upgrade fetches use a
//!   dedicated HTTP/1.1 handshake because the upgraded socket must be owned
//!   by the relay, not returned to a pool
//! - The DNS-level SSRF gate lives inside the client's resolver, so no code
//!   path can dial an unfiltered hostname

pub mod upgrade;
pub mod websocket;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;

use crate::error::BareError;
use crate::remote::Remote;
use crate::security::ssrf::{forbidden_ip, FilteringResolver, SsrfPolicy};

/// Header names that must never reach the remote, even when requested.
pub const FORBIDDEN_SEND_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

type PooledClient = Client<HttpsConnector<HttpConnector<FilteringResolver>>, Body>;

/// Shared outbound state owned by the server instance.
pub struct OutboundClient {
    client: PooledClient,
    policy: Arc<SsrfPolicy>,
    tls: TlsConnector,
}

impl OutboundClient {
    pub fn new(policy: Arc<SsrfPolicy>) -> Self {
        let mut connector = HttpConnector::new_with_resolver(FilteringResolver::new(policy.clone()));
        connector.enforce_http(false);
        connector.set_nodelay(true);
        connector.set_local_address(policy.local_address);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
            policy,
            tls: tls_connector(),
        }
    }

    pub fn policy(&self) -> &SsrfPolicy {
        &self.policy
    }

    /// Issue the tunneled HTTP(S) request, streaming `body` through.
    ///
    /// The caller supplies the headers to transmit; forbidden send headers
    /// are stripped here so every version gets the same discipline.
    pub async fn bare_fetch(
        &self,
        method: Method,
        remote: &Remote,
        mut headers: HeaderMap,
        body: Body,
    ) -> Result<Response<Incoming>, BareError> {
        let url = remote.to_url()?;
        self.policy.filter_remote(&url)?;

        for name in FORBIDDEN_SEND_HEADERS {
            headers.remove(*name);
        }
        if !headers.contains_key(header::HOST) {
            if let Ok(value) = remote.authority().parse() {
                headers.insert(header::HOST, value);
            }
        }

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|_| BareError::invalid_header("x-bare-host", "Invalid remote URL"))?;

        // GET and HEAD requests carry no body.
        let body = if method == Method::GET || method == Method::HEAD {
            Body::empty()
        } else {
            body
        };

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(request_headers) = builder.headers_mut() {
            *request_headers = headers;
        }
        let request = builder
            .body(body)
            .map_err(|e| BareError::unknown("Error", e.to_string()))?;

        self.client
            .request(request)
            .await
            .map_err(|e| BareError::from_transport(&e))
    }

    /// SSRF-checked TCP dial used by the upgrade paths.
    pub(crate) async fn connect_stream(&self, remote: &Remote) -> Result<TcpStream, BareError> {
        let candidates = self.resolve(remote).await?;
        let mut last_error: Option<std::io::Error> = None;
        for addr in candidates {
            match dial(addr, self.policy.local_address).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => BareError::from_io(&e),
            None => BareError::HostNotFound,
        })
    }

    async fn resolve(&self, remote: &Remote) -> Result<Vec<SocketAddr>, BareError> {
        if let Ok(ip) = remote.host.trim_matches(['[', ']']).parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, remote.port);
            if !self.policy.permits(&addr) {
                return Err(BareError::from_io(&forbidden_ip()));
            }
            return Ok(vec![addr]);
        }

        let resolved = tokio::net::lookup_host((remote.host.as_str(), remote.port))
            .await
            .map_err(|_| BareError::HostNotFound)?;
        let resolved: Vec<SocketAddr> = resolved.collect();
        if resolved.is_empty() {
            return Err(BareError::HostNotFound);
        }
        let permitted: Vec<SocketAddr> = resolved
            .into_iter()
            .filter(|a| self.policy.permits(a))
            .collect();
        if permitted.is_empty() {
            return Err(BareError::from_io(&forbidden_ip()));
        }
        Ok(permitted)
    }

    pub(crate) fn tls(&self) -> &TlsConnector {
        &self.tls
    }
}

async fn dial(addr: SocketAddr, local: Option<IpAddr>) -> std::io::Result<TcpStream> {
    match local {
        None => TcpStream::connect(addr).await,
        Some(ip) => {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.bind(SocketAddr::new(ip, 0))?;
            socket.connect(addr).await
        }
    }
}

fn tls_connector() -> TlsConnector {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
