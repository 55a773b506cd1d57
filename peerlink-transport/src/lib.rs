//! peerlink transport
//!
//! High-level async client for peerlink chat sessions over the signaling
//! relay. Wraps `peerlink-core` and a WebSocket connection into a simple
//! register / dial / send / receive API.
//!
//! # Semantics
//!
//! - **Fire-and-forget sends**: `send_text()` reports the stamped message
//!   for local rendering; transmit failures are never surfaced.
//! - **No retries**: a failed registration, a failed dial, or a dropped link
//!   is reported once and recovery is an explicit new call.
//! - **FIFO per link**: events for one peer arrive in transport order; no
//!   ordering is guaranteed across peers.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod chat;
pub mod config;
pub mod error;
mod relay;

pub use chat::{ChatEvent, ChatSession};
pub use config::TransportConfig;
pub use error::TransportError;
