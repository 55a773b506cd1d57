//! Session state machine.
//!
//! One `Session` owns the local identity, the screen state, and the registry
//! of links keyed by remote peer id. It is a plain synchronous fold over
//! typed events (registered, link-up, incoming data, link-down) delivered by
//! whatever transport drives it; there is no I/O in this module, so the whole
//! machine is testable without a network.
//!
//! No retries, no reconnect. A closed link is removed and a new dial is the
//! only recovery.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::envelope::{validate_text, ChatMessage, Envelope};
use crate::error::ChatError;
use crate::link::Link;

/// Alphabet of the random id suffix (base 36, lowercase).
const ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random id suffix.
const ID_SUFFIX_LEN: usize = 9;

/// The local identity. Created once per session, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User-supplied display name (trimmed, non-empty).
    pub display_name: String,
    /// Client-generated opaque id, shared out-of-band for dialing.
    pub id: String,
}

/// Which screen is visible. Exactly one at a time, by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Display-name entry; nothing else reachable.
    Setup,
    /// Registered; the local id is shown for out-of-band sharing.
    Options,
    /// The chat view; dial and send are reachable only here.
    PrivateChat,
}

/// Outcome of feeding an inbound envelope to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The peer announced its display name.
    PeerNamed(String),
    /// A chat message to render as "received".
    Message(ChatMessage),
    /// Payload arrived for an unknown or non-open link; dropped.
    Ignored,
}

/// A message ready to transmit, plus where to send it.
///
/// The caller renders `message` as "sent" unconditionally and transmits the
/// envelope to each recipient fire-and-forget; an empty recipient list means
/// no link is open and nothing is transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The stamped message, for the local "sent" render.
    pub message: ChatMessage,
    /// Peer ids of every currently open link.
    pub recipients: Vec<String>,
}

impl Outbound {
    /// The wire envelope for this message.
    pub fn envelope(&self) -> Envelope {
        Envelope::Message(self.message.clone())
    }
}

/// The session client: identity, screen, and the link registry.
#[derive(Debug)]
pub struct Session {
    identity: Option<Identity>,
    screen: Screen,
    links: HashMap<String, Link>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// New session on the Setup screen with no identity.
    pub fn new() -> Self {
        Self {
            identity: None,
            screen: Screen::Setup,
            links: HashMap::new(),
        }
    }

    /// Current screen.
    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Show a screen, hiding all others.
    pub fn show_screen(&mut self, screen: Screen) {
        self.screen = screen;
    }

    /// Local identity, once setup has run.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Look up a link by remote id.
    pub fn link(&self, peer: &str) -> Option<&Link> {
        self.links.get(peer)
    }

    /// Peer ids of all currently open links.
    pub fn open_peers(&self) -> Vec<String> {
        self.links
            .values()
            .filter(|l| l.is_open())
            .map(|l| l.remote_id().to_owned())
            .collect()
    }

    /// Validate the display name and create the local identity.
    ///
    /// Returns the generated peer id to register with the relay. The session
    /// stays on the Setup screen until [`Session::on_registered`] confirms.
    pub fn begin_setup(&mut self, display_name: &str) -> Result<String, ChatError> {
        let id = generate_peer_id(&mut rand::thread_rng());
        self.begin_setup_with_id(display_name, id)
    }

    /// Like [`Session::begin_setup`] with a caller-supplied id.
    pub fn begin_setup_with_id(
        &mut self,
        display_name: &str,
        id: String,
    ) -> Result<String, ChatError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyDisplayName);
        }
        self.identity = Some(Identity {
            display_name: name.to_owned(),
            id: id.clone(),
        });
        Ok(id)
    }

    /// The relay accepted the registration. Setup → Options.
    pub fn on_registered(&mut self) -> Result<&Identity, ChatError> {
        let identity = self.identity.as_ref().ok_or(ChatError::NotRegistered)?;
        self.screen = Screen::Options;
        Ok(identity)
    }

    /// The relay rejected the registration or was unreachable.
    ///
    /// The identity is discarded and the user stays on the Setup screen;
    /// recovery is re-submitting setup by hand.
    pub fn on_registration_failed(&mut self) {
        self.identity = None;
        self.screen = Screen::Setup;
    }

    /// User-initiated dial of a remote id. Creates a Connecting link.
    ///
    /// Only reachable from the PrivateChat screen. Dialing an id that already
    /// has a link replaces it, mirroring a registry keyed by remote id.
    pub fn dial(&mut self, remote_id: &str) -> Result<(), ChatError> {
        let remote = remote_id.trim();
        if remote.is_empty() {
            return Err(ChatError::EmptyPeerId);
        }
        if self.identity.is_none() {
            return Err(ChatError::NotRegistered);
        }
        if self.screen() != Screen::PrivateChat {
            return Err(ChatError::ChatNotActive);
        }
        self.links.insert(remote.to_owned(), Link::connecting(remote));
        Ok(())
    }

    /// Transport reports a link to `peer` is established.
    ///
    /// Covers both the local dial completing and an inbound connection (for
    /// which no Connecting entry exists yet). Transport-open alone marks the
    /// link Open; the identity handshake only fills in the displayed name
    /// later. Returns the one-shot identity announcement to send.
    pub fn on_link_open(&mut self, peer: &str) -> Result<Envelope, ChatError> {
        let name = self
            .identity
            .as_ref()
            .map(|i| i.display_name.clone())
            .ok_or(ChatError::NotRegistered)?;
        let link = self
            .links
            .entry(peer.to_owned())
            .or_insert_with(|| Link::connecting(peer));
        link.mark_open();
        Ok(Envelope::UserInfo { name })
    }

    /// An envelope arrived from `peer`.
    ///
    /// Payloads for unknown or non-open links are dropped, not errors: the
    /// transport may still deliver data queued before a close was observed.
    pub fn on_data(&mut self, peer: &str, envelope: Envelope) -> Inbound {
        let Some(link) = self.links.get_mut(peer) else {
            return Inbound::Ignored;
        };
        if !link.is_open() {
            return Inbound::Ignored;
        }
        match envelope {
            Envelope::UserInfo { name } => {
                link.set_remote_name(&name);
                Inbound::PeerNamed(name)
            }
            Envelope::Message(message) => Inbound::Message(message),
        }
    }

    /// Transport close or error for `peer`. Removes the registry entry.
    ///
    /// Returns the closed link, or `None` if no link existed.
    pub fn on_link_closed(&mut self, peer: &str) -> Option<Link> {
        let mut link = self.links.remove(peer)?;
        link.mark_closed();
        Some(link)
    }

    /// Build a message for transmission over every open link.
    ///
    /// Rejects empty/whitespace text before any other work. Only reachable
    /// from the PrivateChat screen. The returned [`Outbound`] carries the
    /// recipients snapshot; transmission and the local "sent" render are the
    /// caller's job (fire-and-forget, no delivery feedback).
    pub fn send_message(
        &self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Outbound, ChatError> {
        let text = validate_text(text)?;
        let identity = self.identity.as_ref().ok_or(ChatError::NotRegistered)?;
        if self.screen() != Screen::PrivateChat {
            return Err(ChatError::ChatNotActive);
        }
        let message = ChatMessage::new(text, identity.display_name.clone(), now)?;
        Ok(Outbound {
            message,
            recipients: self.open_peers(),
        })
    }
}

/// Generate a peer id: `user-` plus 9 random base-36 characters.
pub fn generate_peer_id<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("user-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkState;

    /// Drive two sessions through registration and a mutual link, delivering
    /// each side's identity announcement to the other.
    fn linked_pair() -> (Session, Session, String, String) {
        let mut a = Session::new();
        let mut b = Session::new();
        let a_id = a.begin_setup("Alice").unwrap();
        let b_id = b.begin_setup("Bob").unwrap();
        a.on_registered().unwrap();
        b.on_registered().unwrap();
        a.show_screen(Screen::PrivateChat);
        b.show_screen(Screen::PrivateChat);

        a.dial(&b_id).unwrap();
        let a_hello = a.on_link_open(&b_id).unwrap();
        let b_hello = b.on_link_open(&a_id).unwrap();

        assert_eq!(
            b.on_data(&a_id, a_hello),
            Inbound::PeerNamed("Alice".into())
        );
        assert_eq!(a.on_data(&b_id, b_hello), Inbound::PeerNamed("Bob".into()));
        (a, b, a_id, b_id)
    }

    #[test]
    fn peer_id_format() {
        let id = generate_peer_id(&mut rand::thread_rng());
        assert!(id.starts_with("user-"));
        assert_eq!(id.len(), "user-".len() + 9);
        assert!(id["user-".len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn setup_requires_display_name() {
        let mut s = Session::new();
        assert_eq!(s.begin_setup(""), Err(ChatError::EmptyDisplayName));
        assert_eq!(s.begin_setup("   "), Err(ChatError::EmptyDisplayName));
        assert!(s.identity().is_none());
        assert_eq!(s.screen(), Screen::Setup);
    }

    #[test]
    fn registration_moves_to_options() {
        let mut s = Session::new();
        let id = s.begin_setup("  Alice  ").unwrap();
        assert_eq!(s.screen(), Screen::Setup);

        let identity = s.on_registered().unwrap();
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.id, id);
        assert_eq!(s.screen(), Screen::Options);
    }

    #[test]
    fn registration_failure_returns_to_setup() {
        let mut s = Session::new();
        s.begin_setup("Alice").unwrap();
        s.on_registration_failed();
        assert!(s.identity().is_none());
        assert_eq!(s.screen(), Screen::Setup);
        // manual retry works
        s.begin_setup("Alice").unwrap();
        s.on_registered().unwrap();
    }

    #[test]
    fn dial_gated_by_screen_and_identity() {
        let mut s = Session::new();
        assert_eq!(s.dial("user-x"), Err(ChatError::NotRegistered));

        s.begin_setup("Alice").unwrap();
        s.on_registered().unwrap();
        assert_eq!(s.dial("user-x"), Err(ChatError::ChatNotActive));
        assert_eq!(s.dial(""), Err(ChatError::EmptyPeerId));

        s.show_screen(Screen::PrivateChat);
        s.dial("user-x").unwrap();
        assert_eq!(s.link("user-x").unwrap().state(), LinkState::Connecting);
    }

    #[test]
    fn both_sides_observe_open_and_names() {
        let (a, b, a_id, b_id) = linked_pair();
        assert!(a.link(&b_id).unwrap().is_open());
        assert!(b.link(&a_id).unwrap().is_open());
        assert_eq!(a.link(&b_id).unwrap().remote_name(), Some("Bob"));
        assert_eq!(b.link(&a_id).unwrap().remote_name(), Some("Alice"));
    }

    #[test]
    fn open_before_name_is_known() {
        let mut a = Session::new();
        let mut b = Session::new();
        a.begin_setup("Alice").unwrap();
        let b_id = b.begin_setup("Bob").unwrap();
        a.on_registered().unwrap();
        a.show_screen(Screen::PrivateChat);
        a.dial(&b_id).unwrap();
        a.on_link_open(&b_id).unwrap();
        // connected, name not yet announced
        assert!(a.link(&b_id).unwrap().is_open());
        assert_eq!(a.link(&b_id).unwrap().remote_name(), None);
    }

    #[test]
    fn inbound_link_without_prior_dial() {
        let mut b = Session::new();
        b.begin_setup("Bob").unwrap();
        b.on_registered().unwrap();
        // no dial on this side; transport reports an inbound link
        let hello = b.on_link_open("user-caller").unwrap();
        assert_eq!(hello, Envelope::UserInfo { name: "Bob".into() });
        assert!(b.link("user-caller").unwrap().is_open());
    }

    #[test]
    fn message_exchange() {
        let (a, mut b, a_id, b_id) = linked_pair();

        let out = a.send_message("hello there", Utc::now()).unwrap();
        assert_eq!(out.message.sender, "Alice");
        assert_eq!(out.recipients, vec![b_id.clone()]);

        match b.on_data(&a_id, out.envelope()) {
            Inbound::Message(m) => {
                assert_eq!(m.text, "hello there");
                assert_eq!(m.sender, "Alice");
                assert_eq!(m.timestamp, out.message.timestamp);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn empty_message_rejected_before_any_work() {
        let (a, _b, _a_id, _b_id) = linked_pair();
        assert_eq!(
            a.send_message("   ", Utc::now()),
            Err(ChatError::EmptyMessage)
        );
    }

    #[test]
    fn closed_link_removed_and_no_transmission() {
        let (mut a, _b, _a_id, b_id) = linked_pair();

        let closed = a.on_link_closed(&b_id).unwrap();
        assert_eq!(closed.state(), LinkState::Closed);
        assert!(a.link(&b_id).is_none());

        // send still succeeds locally, transmits to no one
        let out = a.send_message("anyone?", Utc::now()).unwrap();
        assert!(out.recipients.is_empty());

        // closing again is a no-op
        assert!(a.on_link_closed(&b_id).is_none());
    }

    #[test]
    fn fresh_dial_after_close() {
        let (mut a, _b, _a_id, b_id) = linked_pair();
        a.on_link_closed(&b_id);
        a.dial(&b_id).unwrap();
        assert_eq!(a.link(&b_id).unwrap().state(), LinkState::Connecting);
    }

    #[test]
    fn data_on_unopened_link_ignored() {
        let mut a = Session::new();
        a.begin_setup("Alice").unwrap();
        a.on_registered().unwrap();
        a.show_screen(Screen::PrivateChat);
        a.dial("user-x").unwrap();

        // still Connecting
        let env = Envelope::UserInfo { name: "Eve".into() };
        assert_eq!(a.on_data("user-x", env.clone()), Inbound::Ignored);
        // unknown peer
        assert_eq!(a.on_data("user-nobody", env), Inbound::Ignored);
    }

    #[test]
    fn send_loop_is_generic_over_open_links() {
        // the registry is keyed by remote id; nothing bounds it to one entry
        let mut a = Session::new();
        a.begin_setup("Alice").unwrap();
        a.on_registered().unwrap();
        a.show_screen(Screen::PrivateChat);
        for peer in ["user-one", "user-two"] {
            a.dial(peer).unwrap();
            a.on_link_open(peer).unwrap();
        }
        let out = a.send_message("fan out", Utc::now()).unwrap();
        let mut got = out.recipients.clone();
        got.sort();
        assert_eq!(got, vec!["user-one".to_owned(), "user-two".to_owned()]);
    }
}
