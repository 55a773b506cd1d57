use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use peerlink_core::wire::{ClientFrame, ErrorCode, ServerFrame};

const MAX_QUEUE_DEPTH: usize = 32;
const MAX_CONN_PER_IP: usize = 16;

const DEFAULT_PORT: u16 = 9000;
const DEFAULT_PATH: &str = "/peerlink";

/// Relay configuration: listening port and WebSocket mount path.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_owned(),
        }
    }
}

impl RelayConfig {
    /// Read `PEERLINK_PORT` (falling back to `PORT`) and `PEERLINK_PATH`.
    pub fn from_env() -> Self {
        let port = std::env::var("PEERLINK_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let path = std::env::var("PEERLINK_PATH").unwrap_or_else(|_| DEFAULT_PATH.to_owned());
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self { port, path }
    }
}

// A registered endpoint: its outbound queue and the set of peers it is
// currently linked with (for link-down fanout on disconnect).
struct Client {
    tx: mpsc::Sender<ServerFrame>,
    links: HashSet<String>,
}

type Registry = Arc<DashMap<String, Client>>;
type IpConnMap = Arc<DashMap<IpAddr, usize>>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn run_server(listener: TcpListener, config: RelayConfig) {
    let registry: Registry = Arc::new(DashMap::new());
    let ip_conns: IpConnMap = Arc::new(DashMap::new());
    let path = Arc::new(config.path);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let registry = registry.clone();
        let ip_conns = ip_conns.clone();
        let path = path.clone();

        let ip = peer_addr.ip();
        let current_conns = *ip_conns.entry(ip).or_insert(0);
        if current_conns >= MAX_CONN_PER_IP {
            warn!(%ip, "connection cap reached, dropping");
            continue;
        }
        ip_conns.entry(ip).and_modify(|c| *c += 1);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry, &path).await {
                debug!(%ip, error = %e, "connection ended with error");
            }
            ip_conns.entry(ip).and_modify(|c| {
                if *c > 0 {
                    *c -= 1
                }
            });
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Registry,
    path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Plain HTTP liveness probe, answered before any WebSocket handshake.
    let mut peek_buf = [0u8; 16];
    let n = stream.peek(&mut peek_buf).await?;
    if peek_buf[..n].starts_with(b"GET /health") {
        return serve_health(stream).await;
    }

    let expected_path = path.to_owned();
    let callback = move |req: &Request, response: Response| {
        if req.uri().path() == expected_path {
            Ok(response)
        } else {
            let mut resp = ErrorResponse::new(Some("not found".to_owned()));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Err(resp)
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        // Rejected upgrade (wrong path); response already written.
        Err(_) => return Ok(()),
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // 1. First frame must be REGISTER.
    let peer_id = match read_frame(&mut ws_rx).await {
        Some(ClientFrame::Register { id }) if !id.trim().is_empty() => id.trim().to_owned(),
        Some(_) => {
            send_direct(&mut ws_tx, &ServerFrame::Error { code: ErrorCode::BadFrame }).await;
            return Ok(());
        }
        None => return Ok(()),
    };

    // 2. Claim the id. Collisions are rejected, the connection closes, and
    //    the client stays unregistered (no retry here).
    let (tx, rx) = mpsc::channel::<ServerFrame>(MAX_QUEUE_DEPTH);
    match registry.entry(peer_id.clone()) {
        Entry::Occupied(_) => {
            debug!(peer = %peer_id, "id collision");
            send_direct(&mut ws_tx, &ServerFrame::Error { code: ErrorCode::IdTaken }).await;
            return Ok(());
        }
        Entry::Vacant(slot) => {
            slot.insert(Client {
                tx: tx.clone(),
                links: HashSet::new(),
            });
        }
    }
    debug!(peer = %peer_id, "registered");

    // Writer task owns the sink; everything reaches the socket through `tx`.
    tokio::spawn(write_loop(rx, ws_tx));

    let _ = tx.send(ServerFrame::Registered { id: peer_id.clone() }).await;

    // 3. Route frames until the socket goes away.
    while let Some(msg) = ws_rx.next().await {
        let raw = match msg {
            Ok(Message::Text(raw)) => raw,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // ping/pong/binary
        };
        let frame = match serde_json::from_str::<ClientFrame>(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "unparseable frame");
                let _ = tx.send(ServerFrame::Error { code: ErrorCode::BadFrame }).await;
                break;
            }
        };
        match frame {
            ClientFrame::Register { .. } => {
                // Re-registration on a live connection is a protocol violation.
                let _ = tx.send(ServerFrame::Error { code: ErrorCode::BadFrame }).await;
                break;
            }
            ClientFrame::Dial { to } => {
                handle_dial(&registry, &peer_id, &tx, to.trim()).await;
            }
            ClientFrame::Forward { to, payload } => {
                handle_forward(&registry, &peer_id, &tx, &to, payload).await;
            }
        }
    }

    // 4. Registration lives exactly as long as the connection: drop the
    //    entry and tell every linked peer the link is down.
    if let Some((_, client)) = registry.remove(&peer_id) {
        for peer in client.links {
            if let Some(mut entry) = registry.get_mut(&peer) {
                entry.links.remove(&peer_id);
                let peer_tx = entry.tx.clone();
                drop(entry);
                let _ = peer_tx.try_send(ServerFrame::LinkDown {
                    peer: peer_id.clone(),
                });
            }
        }
    }
    debug!(peer = %peer_id, "unregistered");

    Ok(())
}

// Establish a link between caller and `to`, notifying both ends. Dialing an
// unknown (or own) id is answered with PEER_NOT_FOUND and is not fatal.
async fn handle_dial(registry: &Registry, my_id: &str, tx: &mpsc::Sender<ServerFrame>, to: &str) {
    let peer_tx = match registry.get(to) {
        Some(entry) if to != my_id => entry.tx.clone(),
        _ => {
            let _ = tx.send(ServerFrame::Error { code: ErrorCode::PeerNotFound }).await;
            return;
        }
    };

    if let Some(mut me) = registry.get_mut(my_id) {
        me.links.insert(to.to_owned());
    }
    if let Some(mut them) = registry.get_mut(to) {
        them.links.insert(my_id.to_owned());
    }
    debug!(from = %my_id, %to, "link up");

    let _ = tx.send(ServerFrame::LinkUp { peer: to.to_owned() }).await;
    let _ = peer_tx.try_send(ServerFrame::LinkUp {
        peer: my_id.to_owned(),
    });
}

// Deliver an opaque payload over an established link. Without a link the
// frame is dropped. A peer whose queue is full (or who vanished between
// lookup and delivery) is treated as gone: the link is severed and the
// sender told.
async fn handle_forward(
    registry: &Registry,
    my_id: &str,
    tx: &mpsc::Sender<ServerFrame>,
    to: &str,
    payload: serde_json::Value,
) {
    let linked = registry
        .get(my_id)
        .map(|me| me.links.contains(to))
        .unwrap_or(false);
    if !linked {
        debug!(from = %my_id, %to, "forward without link dropped");
        return;
    }

    let delivered = match registry.get(to) {
        Some(entry) => entry
            .tx
            .try_send(ServerFrame::Incoming {
                from: my_id.to_owned(),
                payload,
            })
            .is_ok(),
        None => false,
    };

    if !delivered {
        sever_link(registry, my_id, to);
        let _ = tx.send(ServerFrame::LinkDown { peer: to.to_owned() }).await;
    }
}

fn sever_link(registry: &Registry, a: &str, b: &str) {
    if let Some(mut entry) = registry.get_mut(a) {
        entry.links.remove(b);
    }
    if let Some(mut entry) = registry.get_mut(b) {
        entry.links.remove(a);
    }
}

async fn write_loop(mut rx: mpsc::Receiver<ServerFrame>, mut ws_tx: WsSink) {
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if ws_tx.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

async fn read_frame(
    ws_rx: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Option<ClientFrame> {
    loop {
        match ws_rx.next().await? {
            Ok(Message::Text(raw)) => return serde_json::from_str(&raw).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn send_direct(ws_tx: &mut WsSink, frame: &ServerFrame) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = ws_tx.send(Message::Text(text)).await;
    }
    let _ = ws_tx.close().await;
}

async fn serve_health(
    mut stream: TcpStream,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Consume the request, answer liveness, close.
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await;
    let body = "OK";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
