//! Session errors.
//!
//! Every error is locally terminal: it is reported to the caller and the
//! session remains usable. Nothing escalates to a process-wide failure and
//! nothing is retried automatically.

/// All errors the session client can produce.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Display name is empty or whitespace-only.
    #[error("display name is empty")]
    EmptyDisplayName,

    /// Message text is empty or whitespace-only.
    #[error("message text is empty")]
    EmptyMessage,

    /// Remote peer id is empty or whitespace-only.
    #[error("peer id is empty")]
    EmptyPeerId,

    /// Operation requires a registered identity.
    #[error("no identity registered")]
    NotRegistered,

    /// Operation requires the private chat screen to be active.
    #[error("chat screen is not active")]
    ChatNotActive,
}
