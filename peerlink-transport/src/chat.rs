//! High-level chat session API.
//!
//! `ChatSession` owns a [`Session`] state machine and the relay connection,
//! and drives the one against the other: relay frames are folded into the
//! state machine, state-machine outputs (identity announcement, outbound
//! messages) go back over the wire.
//!
//! Sends are fire-and-forget: a transmit failure is logged and never
//! surfaced, and there is no delivery acknowledgment. A dropped link is
//! reported once as [`ChatEvent::LinkClosed`] and must be re-dialed by the
//! caller; there is no reconnect policy here.

use chrono::Utc;
use tracing::debug;

use peerlink_core::wire::{ClientFrame, ErrorCode, ServerFrame};
use peerlink_core::{ChatMessage, Envelope, Inbound, LinkState, Screen, Session};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::relay::RelayClient;

/// Events observed by the caller of [`ChatSession::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A link to `peer` is open; messages can flow. The peer's display name
    /// arrives separately as [`ChatEvent::PeerNamed`].
    LinkOpen {
        /// Remote peer id.
        peer: String,
    },
    /// The peer announced its display name.
    PeerNamed {
        /// Remote peer id.
        peer: String,
        /// Announced display name.
        name: String,
    },
    /// A chat message to render as "received".
    Message(ChatMessage),
    /// The link to `peer` is gone; its registry entry has been removed.
    LinkClosed {
        /// Remote peer id.
        peer: String,
    },
}

/// A registered chat endpoint.
///
/// Construction registers with the relay; dropping it closes the socket and
/// thereby the registration.
#[derive(Debug)]
pub struct ChatSession {
    session: Session,
    relay: RelayClient,
    pending_dial: Option<String>,
}

impl ChatSession {
    /// Connect to the relay and register an identity.
    ///
    /// Validates the display name, generates (or adopts) the peer id,
    /// registers it, and lands on the chat screen ready to dial. A relay
    /// rejection or an unreachable relay leaves nothing behind; the caller
    /// may simply try again.
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        if !config.insecure_dev && !config.relay_url.starts_with("wss://") {
            return Err(TransportError::ConnectionFailed(
                "wss:// required (use insecure_dev for local testing)".into(),
            ));
        }

        let mut session = Session::new();
        let id = match config.peer_id {
            Some(id) => session.begin_setup_with_id(&config.display_name, id)?,
            None => session.begin_setup(&config.display_name)?,
        };

        let mut relay = RelayClient::connect(&config.relay_url).await?;
        match relay.register(&id).await {
            Ok(_assigned) => {
                session.on_registered()?;
            }
            Err(e) => {
                session.on_registration_failed();
                return Err(e);
            }
        }

        // Headless clients skip the options screen straight to the chat.
        session.show_screen(Screen::PrivateChat);

        Ok(Self {
            session,
            relay,
            pending_dial: None,
        })
    }

    /// Our registered peer id, for out-of-band sharing.
    pub fn peer_id(&self) -> &str {
        self.session
            .identity()
            .map(|i| i.id.as_str())
            .unwrap_or_default()
    }

    /// Peer ids of all currently open links.
    pub fn connected_peers(&self) -> Vec<String> {
        self.session.open_peers()
    }

    /// The remote display name for `peer`, once announced.
    pub fn peer_name(&self, peer: &str) -> Option<String> {
        self.session
            .link(peer)?
            .remote_name()
            .map(|n| n.to_owned())
    }

    /// The state of the link to `peer`, if a registry entry exists.
    pub fn link_state(&self, peer: &str) -> Option<LinkState> {
        self.session.link(peer).map(|l| l.state())
    }

    /// Dial a remote peer id.
    ///
    /// The link stays Connecting until [`ChatSession::next_event`] yields
    /// [`ChatEvent::LinkOpen`]. An unknown id surfaces later as
    /// [`TransportError::PeerNotFound`]; there is no retry.
    pub async fn dial(&mut self, remote_id: &str) -> Result<(), TransportError> {
        self.session.dial(remote_id)?;
        self.pending_dial = Some(remote_id.trim().to_owned());
        self.relay
            .send(&ClientFrame::Dial { to: remote_id.trim().to_owned() })
            .await
    }

    /// Send a chat message over every open link.
    ///
    /// Rejects empty/whitespace text. Returns the stamped message for the
    /// local "sent" render regardless of transmission success.
    pub async fn send_text(&mut self, text: &str) -> Result<ChatMessage, TransportError> {
        let outbound = self.session.send_message(text, Utc::now())?;
        let payload = serde_json::to_value(outbound.envelope())
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;

        for peer in &outbound.recipients {
            let frame = ClientFrame::Forward {
                to: peer.clone(),
                payload: payload.clone(),
            };
            // Fire-and-forget: failures are not surfaced to the sender.
            if let Err(e) = self.relay.send(&frame).await {
                debug!(%peer, error = %e, "transmit failed, message dropped");
            }
        }
        Ok(outbound.message)
    }

    /// Wait for the next chat event.
    ///
    /// Folds relay frames into the session state machine. Opening a link
    /// sends the one-shot identity announcement before the event is
    /// returned.
    pub async fn next_event(&mut self) -> Result<ChatEvent, TransportError> {
        loop {
            match self.relay.recv().await? {
                ServerFrame::LinkUp { peer } => {
                    if self.pending_dial.as_deref() == Some(peer.as_str()) {
                        self.pending_dial = None;
                    }
                    let announcement = self.session.on_link_open(&peer)?;
                    self.announce(&peer, announcement).await;
                    return Ok(ChatEvent::LinkOpen { peer });
                }
                ServerFrame::Incoming { from, payload } => {
                    let envelope: Envelope = serde_json::from_value(payload)
                        .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
                    match self.session.on_data(&from, envelope) {
                        Inbound::PeerNamed(name) => {
                            return Ok(ChatEvent::PeerNamed { peer: from, name })
                        }
                        Inbound::Message(message) => return Ok(ChatEvent::Message(message)),
                        Inbound::Ignored => continue,
                    }
                }
                ServerFrame::LinkDown { peer } => {
                    self.session.on_link_closed(&peer);
                    return Ok(ChatEvent::LinkClosed { peer });
                }
                ServerFrame::Error { code: ErrorCode::PeerNotFound } => {
                    // The failed dial's Connecting entry must not linger.
                    if let Some(peer) = self.pending_dial.take() {
                        self.session.on_link_closed(&peer);
                    }
                    return Err(TransportError::PeerNotFound);
                }
                ServerFrame::Error { code } => return Err(TransportError::Relay(code)),
                ServerFrame::Registered { .. } => continue,
            }
        }
    }

    async fn announce(&mut self, peer: &str, announcement: Envelope) {
        let Ok(payload) = serde_json::to_value(&announcement) else {
            return;
        };
        let frame = ClientFrame::Forward {
            to: peer.to_owned(),
            payload,
        };
        if let Err(e) = self.relay.send(&frame).await {
            debug!(%peer, error = %e, "identity announcement failed");
        }
    }
}
