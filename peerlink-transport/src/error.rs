//! Transport errors.

use peerlink_core::{ChatError, ErrorCode};

/// Errors that can occur while talking to the relay or a peer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the WebSocket connection to the relay.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The relay rejected the registration (id collision).
    #[error("registration rejected: id already taken")]
    RegistrationRejected,

    /// The dialed peer id is not registered with the relay.
    #[error("peer not found")]
    PeerNotFound,

    /// The relay closed the connection or the socket failed.
    #[error("relay connection lost")]
    RelayClosed,

    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A frame or payload could not be parsed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The relay reported an unexpected error code.
    #[error("relay error: {0:?}")]
    Relay(ErrorCode),

    /// Session-level error from the protocol core.
    #[error(transparent)]
    Chat(#[from] ChatError),
}
