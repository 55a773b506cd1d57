//! peerlink protocol core
//!
//! Pure, I/O-free core of the peerlink peer-to-peer chat:
//!
//! - Typed payload envelope (identity announcement, chat message)
//! - Signaling frames exchanged with the relay
//! - The session/link state machine and the message-relay contract
//!
//! Transports feed the [`session::Session`] typed events; everything here is
//! synchronous and unit-testable without a network.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod envelope;
pub mod error;
pub mod link;
pub mod session;
pub mod wire;

pub use envelope::{ChatMessage, Envelope};
pub use error::ChatError;
pub use link::{Link, LinkState};
pub use session::{Identity, Inbound, Outbound, Screen, Session};
pub use wire::{ClientFrame, ErrorCode, ServerFrame};
