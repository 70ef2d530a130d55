//! Outbound address filtering.
//!
//! # Responsibilities
//! - Reject literal-IP targets that are not globally routable unicast
//! - Filter resolved DNS addresses through the same policy
//! - Apply optional local-address binding and address-family pinning
//!
//! # Design Decisions
//! - The hostname gate lives inside the DNS resolver so every path through
//!   the shared HTTP client is covered
//! - Literal IPs never hit DNS, so they are checked before dispatch

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use tower::Service;
use url::Url;

use crate::config::SsrfConfig;
use crate::error::BareError;

/// Address policy applied to every outbound connection.
#[derive(Debug, Clone)]
pub struct SsrfPolicy {
    /// Reject non-unicast targets. On by default.
    pub block_local: bool,
    /// Bind outbound sockets to this local address.
    pub local_address: Option<IpAddr>,
    /// Restrict resolution to one address family (4 or 6); 0 means both.
    pub family: u8,
}

impl Default for SsrfPolicy {
    fn default() -> Self {
        Self {
            block_local: true,
            local_address: None,
            family: 0,
        }
    }
}

impl SsrfPolicy {
    pub fn from_config(config: &SsrfConfig) -> Self {
        Self {
            block_local: config.block_local,
            local_address: config.local_address,
            family: config.family,
        }
    }

    /// Gate for literal-IP targets, called before each outbound request.
    pub fn filter_remote(&self, url: &Url) -> Result<(), BareError> {
        if !self.block_local {
            return Ok(());
        }
        if let Some(host) = url.host_str() {
            if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
                if !is_public_unicast(&ip) {
                    return Err(BareError::unknown("Error", "Forbidden IP"));
                }
            }
        }
        Ok(())
    }

    /// Whether a resolved address may be dialed.
    pub fn permits(&self, addr: &SocketAddr) -> bool {
        if !self.family_permits(&addr.ip()) {
            return false;
        }
        !self.block_local || is_public_unicast(&addr.ip())
    }

    fn family_permits(&self, ip: &IpAddr) -> bool {
        match self.family {
            4 => ip.is_ipv4(),
            6 => ip.is_ipv6(),
            _ => true,
        }
    }
}

/// True when the address is globally routable unicast. Loopback, RFC 1918,
/// link-local, CGNAT, ULA, multicast, broadcast, unspecified, and the
/// documentation ranges all fail.
pub fn is_public_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => is_public_unicast_v4(ip),
        IpAddr::V6(ip) => {
            if let Some(mapped) = ip.to_ipv4_mapped() {
                return is_public_unicast_v4(&mapped);
            }
            !(ip.is_loopback()
                || ip.is_unspecified()
                || ip.is_multicast()
                // fe80::/10 link-local
                || (ip.segments()[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                // 2001:db8::/32 documentation
                || (ip.segments()[0] == 0x2001 && ip.segments()[1] == 0x0db8))
        }
    }
}

fn is_public_unicast_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 192.0.0.0/24 IETF protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240)
}

/// DNS resolver wrapping the system resolver with the unicast policy. This
/// is the lookup hook for every hostname the shared HTTP client dials.
#[derive(Clone)]
pub struct FilteringResolver {
    inner: GaiResolver,
    policy: Arc<SsrfPolicy>,
}

impl FilteringResolver {
    pub fn new(policy: Arc<SsrfPolicy>) -> Self {
        Self {
            inner: GaiResolver::new(),
            policy,
        }
    }
}

impl Service<Name> for FilteringResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let mut inner = self.inner.clone();
        let policy = self.policy.clone();
        Box::pin(async move {
            let addrs = inner.call(name).await?;
            let permitted: Vec<SocketAddr> = addrs.filter(|a| policy.permits(a)).collect();
            if permitted.is_empty() {
                return Err(forbidden_ip());
            }
            Ok(permitted.into_iter())
        })
    }
}

/// The marker error the transport mapper recognizes as an SSRF rejection.
pub fn forbidden_ip() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "Forbidden IP")
}
