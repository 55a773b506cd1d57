//! Per-peer link state.
//!
//! States: Connecting → Open → Closed, with Connecting → Closed on error.
//! "Idle" is the absence of a link. Closed links are dropped from the
//! session's registry; a fresh dial creates a new link.

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Dial in flight, or inbound request not yet opened by the transport.
    Connecting,
    /// Transport is established; messages flow.
    Open,
    /// Transport closed or errored. Terminal.
    Closed,
}

/// One direct connection to exactly one remote identity.
///
/// The remote display name is learned lazily from the peer's identity
/// announcement; the link is Open before the name is known.
#[derive(Debug, Clone)]
pub struct Link {
    remote_id: String,
    remote_name: Option<String>,
    state: LinkState,
}

impl Link {
    /// Create a link in the Connecting state.
    pub fn connecting(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            remote_name: None,
            state: LinkState::Connecting,
        }
    }

    /// Remote peer id.
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Remote display name, if the peer has announced itself.
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True once the transport reported open.
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Transport reported the link established.
    pub(crate) fn mark_open(&mut self) {
        self.state = LinkState::Open;
    }

    /// Transport reported close or error.
    pub(crate) fn mark_closed(&mut self) {
        self.state = LinkState::Closed;
    }

    /// Record the peer's announced display name.
    pub(crate) fn set_remote_name(&mut self, name: impl Into<String>) {
        self.remote_name = Some(name.into());
    }
}
