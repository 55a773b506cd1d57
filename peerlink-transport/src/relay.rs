//! WebSocket client to the signaling relay.
//!
//! Internal module. Strict 1:1 mapping between WS text messages and
//! signaling frames: each `send()` is exactly one `ws.send(Text(...))`
//! and each `recv()` is one parsed text message. No buffering.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use peerlink_core::wire::{ClientFrame, ErrorCode, ServerFrame};

use crate::error::TransportError;

/// Internal relay connection.
///
/// Does not implement `Clone` to prevent socket duplication.
pub(crate) struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient").finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Open the WebSocket connection to the relay.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { ws })
    }

    /// Register our id with the relay.
    ///
    /// Returns the assigned id, or `RegistrationRejected` on collision.
    pub async fn register(&mut self, id: &str) -> Result<String, TransportError> {
        self.send(&ClientFrame::Register { id: id.to_owned() }).await?;
        match self.recv().await? {
            ServerFrame::Registered { id } => Ok(id),
            ServerFrame::Error { code: ErrorCode::IdTaken } => {
                Err(TransportError::RegistrationRejected)
            }
            ServerFrame::Error { code } => Err(TransportError::Relay(code)),
            other => Err(TransportError::InvalidFrame(format!(
                "unexpected frame during registration: {:?}",
                other
            ))),
        }
    }

    /// Send one signaling frame.
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
        self.ws
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    /// Receive the next signaling frame, skipping ping/pong noise.
    pub async fn recv(&mut self) -> Result<ServerFrame, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| TransportError::InvalidFrame(e.to_string()));
                }
                Some(Ok(WsMessage::Close(_))) => return Err(TransportError::RelayClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                None => return Err(TransportError::RelayClosed),
            }
        }
    }
}
