//! Application payload envelope.
//!
//! Wire shape (JSON, adjacently tagged):
//! ```text
//! {"type": "user-info", "data": {"name": "Alice"}}
//! {"type": "message",   "data": {"text": "hi", "sender": "Alice", "timestamp": "2026-08-30T12:00:00Z"}}
//! ```
//!
//! The envelope is a closed union: an unknown `type` is a parse error, and a
//! new payload kind is a compile-time-checked addition to this enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A single chat message. Immutable once created, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message body.
    pub text: String,
    /// Sender's display name at the time of sending.
    pub sender: String,
    /// UTC instant the sender stamped, serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message stamped with the given sender and instant.
    ///
    /// Rejects empty or whitespace-only text. The stored text is trimmed.
    pub fn new(
        text: &str,
        sender: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ChatError> {
        let text = validate_text(text)?;
        Ok(Self {
            text: text.to_owned(),
            sender: sender.into(),
            timestamp,
        })
    }
}

/// Everything that may travel over an open link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Envelope {
    /// One-shot identity announcement, sent right after a link opens.
    UserInfo {
        /// Sender's display name.
        name: String,
    },
    /// A chat message.
    Message(ChatMessage),
}

/// Validate outbound message text.
///
/// Returns the trimmed text, or an error if nothing remains after trimming.
pub fn validate_text(text: &str) -> Result<&str, ChatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn user_info_wire_shape() {
        let env = Envelope::UserInfo {
            name: "Alice".into(),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "user-info", "data": {"name": "Alice"}})
        );
    }

    #[test]
    fn message_wire_shape() {
        let msg = ChatMessage::new("hi", "Alice", instant()).unwrap();
        let json = serde_json::to_value(Envelope::Message(msg)).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["data"]["text"], "hi");
        assert_eq!(json["data"]["sender"], "Alice");
        assert_eq!(json["data"]["timestamp"], "2026-08-30T12:00:00Z");
    }

    #[test]
    fn message_roundtrip_preserves_instant() {
        let msg = ChatMessage::new("round trip", "Bob", Utc::now()).unwrap();
        let wire = serde_json::to_string(&Envelope::Message(msg.clone())).unwrap();
        let parsed: Envelope = serde_json::from_str(&wire).unwrap();
        match parsed {
            Envelope::Message(m) => {
                assert_eq!(m.text, msg.text);
                assert_eq!(m.sender, msg.sender);
                assert_eq!(m.timestamp, msg.timestamp);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_rejected() {
        let wire = r#"{"type": "file-offer", "data": {}}"#;
        assert!(serde_json::from_str::<Envelope>(wire).is_err());
    }

    #[test]
    fn empty_text_rejected() {
        assert_eq!(
            ChatMessage::new("   ", "Alice", instant()),
            Err(ChatError::EmptyMessage)
        );
        assert_eq!(
            ChatMessage::new("", "Alice", instant()),
            Err(ChatError::EmptyMessage)
        );
    }

    #[test]
    fn text_is_trimmed() {
        let msg = ChatMessage::new("  hello  ", "Alice", instant()).unwrap();
        assert_eq!(msg.text, "hello");
    }
}
