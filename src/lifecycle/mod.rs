//! Lifecycle coordination.
//!
//! # Design Decisions
//! - One broadcast channel fans the shutdown signal out to the serve loop,
//!   the meta reaper, and every live relay

pub mod shutdown;

pub use shutdown::Shutdown;
