//! Signaling frames exchanged with the relay.
//!
//! JSON text messages, internally tagged. The relay routes `forward` payloads
//! as opaque values; only the two endpoints parse them as [`Envelope`]s.
//!
//! [`Envelope`]: crate::envelope::Envelope

use serde::{Deserialize, Serialize};

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Register this connection under a client-generated id.
    /// Must be the first frame on a new connection.
    Register {
        /// Proposed peer id.
        id: String,
    },
    /// Request a link to another registered peer.
    Dial {
        /// Remote peer id.
        to: String,
    },
    /// Deliver an opaque payload to a linked peer.
    Forward {
        /// Remote peer id.
        to: String,
        /// Application payload; the relay never interprets it.
        payload: serde_json::Value,
    },
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Registration succeeded; the id is now routable.
    Registered {
        /// Assigned (echoed) peer id.
        id: String,
    },
    /// A link to `peer` is established. Sent to both ends of a dial.
    LinkUp {
        /// Remote peer id.
        peer: String,
    },
    /// An opaque payload from a linked peer.
    Incoming {
        /// Sending peer id.
        from: String,
        /// Application payload, verbatim.
        payload: serde_json::Value,
    },
    /// The link to `peer` is gone (peer disconnected or unreachable).
    LinkDown {
        /// Remote peer id.
        peer: String,
    },
    /// The previous client frame was rejected.
    Error {
        /// Rejection reason.
        code: ErrorCode,
    },
}

/// Relay rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The requested id is already registered.
    IdTaken,
    /// Dial target is not registered.
    PeerNotFound,
    /// Frame could not be parsed or was sent out of order.
    BadFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_wire_shape() {
        let json = serde_json::to_value(ClientFrame::Register {
            id: "user-abc123def".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "register", "id": "user-abc123def"})
        );

        let json = serde_json::to_value(ClientFrame::Dial {
            to: "user-xyz".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "dial");
    }

    #[test]
    fn server_error_codes() {
        let json = serde_json::to_value(ServerFrame::Error {
            code: ErrorCode::IdTaken,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "code": "id-taken"}));
    }

    #[test]
    fn forward_payload_is_opaque() {
        let wire = r#"{"type": "forward", "to": "user-1", "payload": {"anything": [1, 2, 3]}}"#;
        let frame: ClientFrame = serde_json::from_str(wire).unwrap();
        match frame {
            ClientFrame::Forward { to, payload } => {
                assert_eq!(to, "user-1");
                assert_eq!(payload["anything"][0], 1);
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_type_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ServerFrame>(r#"{"type": "pong"}"#).is_err());
    }
}
