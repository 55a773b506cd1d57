//! Transport configuration.

/// Configuration for joining the relay as a chat endpoint.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay URL including the mount path
    /// (e.g. "wss://relay.example:9000/peerlink").
    pub relay_url: String,
    /// Display name announced to peers. Must be non-empty after trimming.
    pub display_name: String,
    /// Fixed peer id; `None` generates a fresh `user-xxxxxxxxx` id.
    pub peer_id: Option<String>,
    /// Allow insecure ws:// connections (for localhost development only).
    pub insecure_dev: bool,
}

impl TransportConfig {
    /// Create a configuration with a generated peer id.
    pub fn new(relay_url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            display_name: display_name.into(),
            peer_id: None,
            insecure_dev: false,
        }
    }

    /// Register under a fixed peer id instead of a generated one.
    pub fn with_peer_id(mut self, id: impl Into<String>) -> Self {
        self.peer_id = Some(id.into());
        self
    }

    /// Allow insecure ws:// connections (for localhost development only).
    pub fn with_insecure_dev(mut self) -> Self {
        self.insecure_dev = true;
        self
    }
}
