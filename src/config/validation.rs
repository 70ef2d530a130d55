//! Configuration validation logic.

use std::net::SocketAddr;

use crate::config::schema::BareConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a BareConfig for semantic correctness.
pub fn validate_config(config: &BareConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. The mount prefix anchors routing; both slashes are load-bearing.
    let prefix = &config.server.mount_prefix;
    if !prefix.starts_with('/') || !prefix.ends_with('/') {
        errors.push(ValidationError(format!(
            "server.mount_prefix '{prefix}' must start and end with '/'"
        )));
    }

    // 2. Addresses must parse before we try to bind them.
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError(format!(
            "listener.bind_address '{}' is not a valid socket address",
            config.listener.bind_address
        )));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError(format!(
            "observability.metrics_address '{}' is not a valid socket address",
            config.observability.metrics_address
        )));
    }

    // 3. Outbound family pinning only understands 0, 4 and 6.
    if !matches!(config.ssrf.family, 0 | 4 | 6) {
        errors.push(ValidationError(format!(
            "ssrf.family must be 0, 4 or 6 (got {})",
            config.ssrf.family
        )));
    }

    // 4. An enabled limiter with a zero rate would reject everything.
    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError(
                "rate_limit.requests_per_second must be > 0".to_string(),
            ));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError(
                "rate_limit.burst_size must be > 0".to_string(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
