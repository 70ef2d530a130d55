//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, prefix routing, error funnel)
//!     → request.rs (sub-path, cache query, upgrade detection)
//!     → [proto layer parses the envelope and fetches]
//!     → response.rs (envelope encoding, CORS)
//!     → websocket.rs (relay loops for upgraded exchanges)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use server::{AppState, BareServer};
