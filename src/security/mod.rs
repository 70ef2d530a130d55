//! Security subsystem.
//!
//! # Responsibilities
//! - Per-IP request rate limiting (token bucket)
//! - Outbound address filtering against non-unicast targets
//!
//! # Design Decisions
//! - Both concerns are policy objects owned by the server instance; routes
//!   and fetch paths consult them rather than global state

pub mod rate_limit;
pub mod ssrf;

pub use rate_limit::{client_ip, RateLimiter, RateLimiterLayerState};
pub use ssrf::{FilteringResolver, SsrfPolicy};
