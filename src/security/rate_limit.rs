//! Per-IP rate limiting middleware.
//!
//! Each client IP owns a token bucket (capacity = burst, refill =
//! requests/second). Keep-alive exchanges consume a token; one-shot
//! connections only inspect the remaining count, since the socket teardown
//! already throttles them.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Request, Version};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::BareError;
use crate::observability::metrics;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn peek(&mut self, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate);
        self.tokens >= 1.0
    }

    /// Seconds until the next token becomes available.
    fn reset_after(&self, refill_rate: f64) -> u64 {
        if self.tokens >= 1.0 {
            0
        } else {
            ((1.0 - self.tokens) / refill_rate).ceil() as u64
        }
    }
}

/// Shared limiter state keyed by client IP.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Mutex<TokenBucket>>,
    capacity: f64,
    refill_rate: f64,
}

/// Outcome of a limiter check, carrying the values for the RateLimit-*
/// response headers.
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: config.burst_size.max(1) as f64,
            refill_rate: config.requests_per_second.max(1) as f64,
        }
    }

    /// Check the bucket for `ip`. `consume` distinguishes keep-alive
    /// exchanges (take a token) from one-shot ones (inspect only).
    pub fn check(&self, ip: IpAddr, consume: bool) -> RateDecision {
        let bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.capacity)));
        let mut bucket = bucket.lock().expect("rate limiter mutex poisoned");
        let allowed = if consume {
            bucket.try_acquire(self.capacity, self.refill_rate)
        } else {
            bucket.peek(self.capacity, self.refill_rate)
        };
        RateDecision {
            allowed,
            limit: self.capacity as u64,
            remaining: bucket.tokens.floor() as u64,
            reset_secs: bucket.reset_after(self.refill_rate),
        }
    }
}

/// Resolve the client IP: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real.trim().parse() {
            return ip;
        }
    }
    peer.ip()
}

/// Whether the exchange rides a keep-alive connection. Heuristic: HTTP/1.1+
/// without an explicit `Connection: close`.
fn is_keep_alive(req: &Request<Body>) -> bool {
    let close = req
        .headers()
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    req.version() >= Version::HTTP_11 && !close
}

/// State injected into the middleware.
pub struct RateLimiterLayerState {
    pub limiter: RateLimiter,
    pub log_errors: bool,
}

/// Middleware enforcing the per-IP bucket. Upgrade requests pass through
/// here as well, so exhausted WebSocket clients get the same 429.
pub async fn rate_limit_middleware(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RateLimiterLayerState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer);
    let decision = state.limiter.check(ip, is_keep_alive(&request));

    if decision.allowed {
        return next.run(request).await;
    }

    tracing::warn!(client = %ip, "Rate limit exceeded");
    metrics::record_rate_limited();

    let mut response = BareError::TooManyConnections.into_response(state.log_errors);
    let headers = response.headers_mut();
    let set = |headers: &mut HeaderMap, name: &'static str, value: u64| {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set(headers, "retry-after", decision.reset_secs.max(1));
    set(headers, "ratelimit-limit", decision.limit);
    set(headers, "ratelimit-remaining", decision.remaining);
    set(headers, "ratelimit-reset", decision.reset_secs);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
        })
    }

    #[test]
    fn test_consume_exhausts_bucket() {
        let limiter = limiter(1, 2);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert!(limiter.check(ip, true).allowed);
        assert!(limiter.check(ip, true).allowed);
        let decision = limiter.check(ip, true);
        assert!(!decision.allowed);
        assert_eq!(decision.limit, 2);
        assert!(decision.reset_secs >= 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let limiter = limiter(1, 1);
        let ip: IpAddr = "203.0.113.8".parse().unwrap();
        assert!(limiter.check(ip, false).allowed);
        assert!(limiter.check(ip, false).allowed);
        // The token is still there for a consuming exchange.
        assert!(limiter.check(ip, true).allowed);
        assert!(!limiter.check(ip, true).allowed);
    }

    #[test]
    fn test_buckets_are_per_ip() {
        let limiter = limiter(1, 1);
        let a: IpAddr = "203.0.113.9".parse().unwrap();
        let b: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(limiter.check(a, true).allowed);
        assert!(limiter.check(b, true).allowed);
    }

    #[test]
    fn test_client_ip_resolution_order() {
        let peer: SocketAddr = "198.51.100.1:9999".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), peer.ip());

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            client_ip(&headers, peer),
            "198.51.100.2".parse::<IpAddr>().unwrap()
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.3, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, peer),
            "198.51.100.3".parse::<IpAddr>().unwrap()
        );
    }
}
