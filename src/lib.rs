//! Server-side tunneling proxy.
//!
//! Relays arbitrary HTTP(S) requests and WebSocket sessions on behalf of a
//! browser-resident client. The client describes the real target inside an
//! envelope (`x-bare-*` headers or a WebSocket connect frame); this server
//! performs the outbound exchange and encodes the response so the client
//! can rebuild a Fetch-compatible view of it.
//!
//! Three wire protocol versions (v1, v2, v3) are served concurrently from
//! the same mount prefix; they differ in how the envelope is framed and in
//! header-forwarding discipline.

// Core subsystems
pub mod config;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod http;
pub mod meta;
pub mod proto;
pub mod remote;

// Cross-cutting concerns
pub mod info;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::BareConfig;
pub use error::BareError;
pub use http::BareServer;
pub use lifecycle::Shutdown;
