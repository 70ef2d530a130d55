//! Remote endpoint addressing.
//!
//! v1/v2 carry the target as a `(protocol, host, port, path)` tuple split
//! across envelope headers; v3 carries a single URL. Both normalize into
//! [`Remote`].

use std::fmt;

use url::Url;

use crate::error::BareError;

/// Outbound scheme accepted by the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    Http,
    Https,
    Ws,
    Wss,
}

impl RemoteProtocol {
    /// Parse the wire form (`"https:"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http:" => Some(Self::Http),
            "https:" => Some(Self::Https),
            "ws:" => Some(Self::Ws),
            "wss:" => Some(Self::Wss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http:",
            Self::Https => "https:",
            Self::Ws => "ws:",
            Self::Wss => "wss:",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Https | Self::Wss)
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }

    /// The equivalent request scheme: WebSocket schemes translate to their
    /// HTTP counterparts for the upgrade request line.
    pub fn http_equivalent(&self) -> Self {
        match self {
            Self::Ws => Self::Http,
            Self::Wss => Self::Https,
            other => *other,
        }
    }
}

impl fmt::Display for RemoteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated target endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub protocol: RemoteProtocol,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Remote {
    /// Parse the split v1/v2 header form. Port arrives as a string.
    pub fn from_parts(
        protocol: &str,
        host: &str,
        port: &str,
        path: &str,
    ) -> Result<Self, BareError> {
        let protocol = RemoteProtocol::parse(protocol).ok_or_else(|| {
            BareError::invalid_header("x-bare-protocol", "Header was invalid")
        })?;
        if host.is_empty() {
            return Err(BareError::invalid_header("x-bare-host", "Header was empty"));
        }
        let port: u16 = port
            .parse::<u32>()
            .ok()
            .filter(|p| (1..=65535).contains(p))
            .map(|p| p as u16)
            .ok_or_else(|| BareError::invalid_header("x-bare-port", "Header was not a valid integer"))?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            return Err(BareError::invalid_header("x-bare-path", "Header was invalid"));
        };
        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Parse the single-URL v3 form, resolving scheme default ports.
    pub fn from_url(url: &Url) -> Result<Self, BareError> {
        let protocol = RemoteProtocol::parse(&format!("{}:", url.scheme())).ok_or_else(|| {
            BareError::invalid_header("x-bare-url", "Invalid protocol")
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| BareError::invalid_header("x-bare-url", "Missing host"))?
            .to_string();
        let port = url.port().unwrap_or_else(|| protocol.default_port());
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self {
            protocol,
            host,
            port,
            path,
        })
    }

    /// Render as a URL.
    pub fn to_url(&self) -> Result<Url, BareError> {
        Url::parse(&format!(
            "{}//{}:{}{}",
            self.protocol,
            self.url_host(),
            self.port,
            self.path
        ))
        .map_err(|e| BareError::invalid_header("x-bare-host", e.to_string()))
    }

    /// `host:port`, eliding default ports the way browsers render authority.
    pub fn authority(&self) -> String {
        if self.port == self.protocol.default_port() {
            self.url_host()
        } else {
            format!("{}:{}", self.url_host(), self.port)
        }
    }

    /// IPv6 literals need brackets in authority position.
    fn url_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_valid() {
        let remote = Remote::from_parts("https:", "example.com", "443", "/a?b=c").unwrap();
        assert_eq!(remote.protocol, RemoteProtocol::Https);
        assert_eq!(remote.port, 443);
        assert_eq!(remote.to_url().unwrap().as_str(), "https://example.com/a?b=c");
    }

    #[test]
    fn test_from_parts_rejects_bad_port() {
        for port in ["", "abc", "0", "65536", "-1", "80.5"] {
            let err = Remote::from_parts("http:", "example.com", port, "/").unwrap_err();
            assert_eq!(err.code(), "INVALID_BARE_HEADER");
        }
    }

    #[test]
    fn test_from_parts_rejects_bad_protocol() {
        for protocol in ["ftp:", "http", "", "javascript:"] {
            let err = Remote::from_parts(protocol, "example.com", "80", "/").unwrap_err();
            assert_eq!(err.code(), "INVALID_BARE_HEADER");
        }
    }

    #[test]
    fn test_from_url_default_ports() {
        let ws = Remote::from_url(&Url::parse("ws://example.com/chat").unwrap()).unwrap();
        assert_eq!(ws.port, 80);
        let wss = Remote::from_url(&Url::parse("wss://example.com/chat?x=1").unwrap()).unwrap();
        assert_eq!(wss.port, 443);
        assert_eq!(wss.path, "/chat?x=1");
    }

    #[test]
    fn test_authority_elides_default_port() {
        let remote = Remote::from_parts("https:", "example.com", "443", "/").unwrap();
        assert_eq!(remote.authority(), "example.com");
        let remote = Remote::from_parts("https:", "example.com", "8443", "/").unwrap();
        assert_eq!(remote.authority(), "example.com:8443");
    }
}
