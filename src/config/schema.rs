//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tunnel
//! server. All types derive Serde traits for deserialization from config
//! files.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BareConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Core server behavior (mount prefix, error detail, maintainer).
    pub server: ServerConfig,

    /// Outbound address filtering.
    pub ssrf: SsrfConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Core server behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// URL path the tunnel is mounted under. Must start and end with `/`.
    pub mount_prefix: String,

    /// Attach failure detail (including stacks) to UNKNOWN error bodies and
    /// log handler errors.
    pub log_errors: bool,

    /// Upper bound on producing a response head, in seconds. Body streaming
    /// is not affected.
    pub request_timeout_secs: u64,

    /// Contact information surfaced in the instance manifest.
    pub maintainer: Option<MaintainerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mount_prefix: "/".to_string(),
            log_errors: false,
            request_timeout_secs: 30,
            maintainer: None,
        }
    }
}

/// Maintainer contact published in the instance manifest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintainerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Outbound address filtering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsrfConfig {
    /// Reject non-unicast targets (loopback, RFC 1918, link-local, ...).
    pub block_local: bool,

    /// Bind outbound sockets to this local address.
    pub local_address: Option<IpAddr>,

    /// Restrict outbound connections to one address family (4 or 6);
    /// 0 means both.
    pub family: u8,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            block_local: true,
            local_address: None,
            family: 0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Token refill rate per IP.
    pub requests_per_second: u32,

    /// Burst capacity per IP.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
