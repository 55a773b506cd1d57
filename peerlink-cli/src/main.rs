use std::io::{self, Write};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use clap::Parser;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use peerlink_core::wire::{ClientFrame, ErrorCode, ServerFrame};
use peerlink_core::{ChatError, ChatMessage, Envelope, Inbound, Screen, Session};

/// Minimal peer-to-peer text chat over a signaling relay.
#[derive(Debug, Parser)]
#[command(name = "peerlink")]
struct Args {
    /// Relay URL including the mount path
    #[arg(long, default_value = "ws://127.0.0.1:9000/peerlink")]
    server: String,

    /// Display name (prompted for if omitted)
    #[arg(long)]
    name: Option<String>,

    /// Peer id to dial as soon as registration completes
    #[arg(long)]
    connect: Option<String>,

    /// Allow ws:// connections (localhost development only)
    #[arg(long)]
    insecure_dev: bool,
}

enum AppEvent {
    Frame(ServerFrame),
    Disconnected,
}

struct App {
    session: Session,
    log: Vec<String>,
    input: String,
    status: String,
    dial_on_register: Option<String>,
    pending_dial: Option<String>,
    last_draw: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.server.starts_with("ws://") && !args.insecure_dev {
        anyhow::bail!("ws:// is only allowed with --insecure-dev on localhost");
    }

    let mut session = Session::new();
    let display_name = match args.name.clone() {
        Some(name) => name,
        None => prompt_display_name()?,
    };
    let peer_id = session.begin_setup(&display_name)?;

    let mut app = App {
        session,
        log: Vec::new(),
        input: String::new(),
        status: "Registering...".to_owned(),
        dial_on_register: args.connect.clone(),
        pending_dial: None,
        last_draw: Instant::now(),
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, Clear(ClearType::All), cursor::Hide)?;

    let result = app.run(&args.server, peer_id).await;

    disable_raw_mode()?;
    execute!(stdout, cursor::Show)?;
    if let Err(e) = result {
        println!("\nError: {}", e);
    }
    println!("\nSession ended.");
    Ok(())
}

fn prompt_display_name() -> anyhow::Result<String> {
    loop {
        print!("Display name: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        if !line.trim().is_empty() {
            return Ok(line.trim().to_owned());
        }
        println!("Please enter a display name.");
    }
}

impl App {
    async fn run(&mut self, server_url: &str, peer_id: String) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(32);
        let (net_tx, mut net_rx) = mpsc::channel::<ClientFrame>(32);

        // Networking task: one WebSocket, no reconnect. When the relay goes
        // away the session is over and the user restarts by hand.
        let server_url = server_url.to_owned();
        tokio::spawn(async move {
            let Ok((ws_stream, _)) = connect_async(&server_url).await else {
                let _ = event_tx.send(AppEvent::Disconnected).await;
                return;
            };
            let (mut ws_tx, mut ws_rx) = ws_stream.split();
            loop {
                tokio::select! {
                    Some(frame) = net_rx.recv() => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if ws_tx.send(Message::Text(text)).await.is_err() { break; }
                    }
                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) {
                                    if event_tx.send(AppEvent::Frame(frame)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            let _ = event_tx.send(AppEvent::Disconnected).await;
        });

        net_tx
            .send(ClientFrame::Register { id: peer_id.clone() })
            .await?;
        self.log.push(format!("Your id: {}", peer_id));

        loop {
            if Instant::now().duration_since(self.last_draw) > Duration::from_millis(50) {
                self.draw()?;
                self.last_draw = Instant::now();
            }

            tokio::select! {
                Some(event) = event_rx.recv() => {
                    self.handle_event(event, &net_tx).await?;
                }
                Ok(Ok(true)) = tokio::task::spawn_blocking(|| event::poll(Duration::from_millis(10))) => {
                    if let Event::Key(key) = event::read()? {
                        match key.code {
                            KeyCode::Enter => {
                                if !self.input.is_empty() {
                                    let line = std::mem::take(&mut self.input);
                                    if !self.handle_line(&line, &net_tx).await? {
                                        return Ok(());
                                    }
                                }
                            }
                            KeyCode::Char(c) => self.input.push(c),
                            KeyCode::Backspace => { self.input.pop(); }
                            KeyCode::Esc => return Ok(()),
                            _ => {}
                        }
                    }
                }
                // No key pending disables the poll branch above for this
                // select; the tick re-enters the loop so input keeps getting
                // polled (and the screen redrawn) during network silence.
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: AppEvent,
        net_tx: &mpsc::Sender<ClientFrame>,
    ) -> anyhow::Result<()> {
        match event {
            AppEvent::Frame(frame) => self.handle_frame(frame, net_tx).await?,
            AppEvent::Disconnected => {
                self.status = "Relay connection lost".to_owned();
                self.log.push("Relay connection lost. Restart to reconnect.".to_owned());
            }
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: ServerFrame,
        net_tx: &mpsc::Sender<ClientFrame>,
    ) -> anyhow::Result<()> {
        match frame {
            ServerFrame::Registered { id } => {
                self.session.on_registered()?;
                self.status = "Ready to connect".to_owned();
                self.log.push(format!("Registered. Share your id to be dialed: {}", id));
                self.log.push("Type /connect <peer-id> to start a chat.".to_owned());
                if let Some(remote) = self.dial_on_register.take() {
                    self.dial(&remote, net_tx).await?;
                }
            }
            ServerFrame::LinkUp { peer } => {
                if self.pending_dial.as_deref() == Some(peer.as_str()) {
                    self.pending_dial = None;
                }
                // An inbound link pulls us straight into the chat view.
                if self.session.screen() != Screen::PrivateChat {
                    self.session.show_screen(Screen::PrivateChat);
                }
                let announcement = self.session.on_link_open(&peer)?;
                let payload = serde_json::to_value(&announcement)?;
                let _ = net_tx
                    .send(ClientFrame::Forward { to: peer.clone(), payload })
                    .await;
                self.status = "Connected".to_owned();
                self.log.push(format!("Connected to {}.", peer));
            }
            ServerFrame::Incoming { from, payload } => {
                match serde_json::from_value::<Envelope>(payload) {
                    Ok(envelope) => match self.session.on_data(&from, envelope) {
                        Inbound::PeerNamed(name) => {
                            self.status = format!("Connected to {}", name);
                            self.log.push(format!("{} is {}.", from, name));
                        }
                        Inbound::Message(message) => {
                            self.log.push(render_message(&message, false));
                        }
                        Inbound::Ignored => {}
                    },
                    Err(e) => self.log.push(format!("Bad payload from {}: {}", from, e)),
                }
            }
            ServerFrame::LinkDown { peer } => {
                let name = self
                    .session
                    .on_link_closed(&peer)
                    .and_then(|l| l.remote_name().map(|n| n.to_owned()))
                    .unwrap_or(peer);
                self.status = "Disconnected".to_owned();
                self.log.push(format!("{} disconnected.", name));
            }
            ServerFrame::Error { code } => match code {
                ErrorCode::IdTaken => {
                    self.session.on_registration_failed();
                    self.status = "Registration failed".to_owned();
                    self.log.push("Registration failed: id already taken. Restart to retry.".to_owned());
                }
                ErrorCode::PeerNotFound => {
                    // The dial failed, so its Connecting entry must not
                    // linger in the registry.
                    if let Some(peer) = self.pending_dial.take() {
                        self.session.on_link_closed(&peer);
                    }
                    self.status = "Disconnected".to_owned();
                    self.log.push("Peer not found.".to_owned());
                }
                ErrorCode::BadFrame => {
                    self.log.push("Relay rejected a frame.".to_owned());
                }
            },
        }
        Ok(())
    }

    /// Returns false when the app should exit.
    async fn handle_line(
        &mut self,
        line: &str,
        net_tx: &mpsc::Sender<ClientFrame>,
    ) -> anyhow::Result<bool> {
        // Match the command token alone too; dial rejects a missing argument.
        if let Some(remote) = line.strip_prefix("/connect") {
            if remote.is_empty() || remote.starts_with(' ') {
                self.dial(remote, net_tx).await?;
                return Ok(true);
            }
        }
        if line.trim() == "/quit" {
            return Ok(false);
        }

        match self.session.send_message(line, Utc::now()) {
            Ok(outbound) => {
                let payload = serde_json::to_value(outbound.envelope())?;
                for peer in &outbound.recipients {
                    // fire-and-forget; a full queue just drops the message
                    let _ = net_tx.try_send(ClientFrame::Forward {
                        to: peer.clone(),
                        payload: payload.clone(),
                    });
                }
                self.log.push(render_message(&outbound.message, true));
            }
            Err(ChatError::ChatNotActive) => {
                self.log.push("Not in a chat. /connect <peer-id> first.".to_owned());
            }
            Err(ChatError::EmptyMessage) => {}
            Err(e) => self.log.push(format!("Cannot send: {}", e)),
        }
        Ok(true)
    }

    async fn dial(
        &mut self,
        remote: &str,
        net_tx: &mpsc::Sender<ClientFrame>,
    ) -> anyhow::Result<()> {
        self.session.show_screen(Screen::PrivateChat);
        match self.session.dial(remote) {
            Ok(()) => {
                self.pending_dial = Some(remote.trim().to_owned());
                net_tx
                    .send(ClientFrame::Dial { to: remote.trim().to_owned() })
                    .await?;
                self.status = "Connecting...".to_owned();
                self.log.push(format!("Dialing {}...", remote.trim()));
            }
            Err(e) => self.log.push(format!("Cannot connect: {}", e)),
        }
        Ok(())
    }

    fn draw(&self) -> io::Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, cursor::MoveTo(0, 0))?;

        let id = self
            .session
            .identity()
            .map(|i| i.id.clone())
            .unwrap_or_else(|| "-".to_owned());
        println!("peerlink | {} | {:?}", id, self.session.screen());
        println!("Status: {:<40}", self.status);
        println!("{}", "=".repeat(60));

        for i in 0..10 {
            execute!(stdout, cursor::MoveTo(0, 3 + i as u16))?;
            execute!(stdout, Clear(ClearType::CurrentLine))?;
            if let Some(line) = self.log.get(self.log.len().saturating_sub(10) + i) {
                println!("{}", line);
            }
        }

        execute!(stdout, cursor::MoveTo(0, 14))?;
        println!("{}", "-".repeat(60));
        execute!(stdout, Clear(ClearType::CurrentLine))?;
        print!("> {}", self.input);
        stdout.flush()?;
        Ok(())
    }
}

fn render_message(message: &ChatMessage, sent: bool) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let who = if sent { "You" } else { message.sender.as_str() };
    format!("[{}] {}: {}", time, who, message.text)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn test_app() -> App {
        let mut session = Session::new();
        session.begin_setup("Alice").unwrap();
        session.on_registered().unwrap();
        session.show_screen(Screen::PrivateChat);
        App {
            session,
            log: Vec::new(),
            input: String::new(),
            status: String::new(),
            dial_on_register: None,
            pending_dial: None,
            last_draw: Instant::now(),
        }
    }

    /// The main loop's select discipline: when the blocking input poll comes
    /// back with no key, that branch is disabled for the rest of the select,
    /// and only the periodic tick re-enters the loop. Without the tick the
    /// loop would block on the event channel and stop reading input entirely.
    #[tokio::test]
    async fn input_poll_rearmed_while_network_is_silent() {
        let polls = Arc::new(AtomicUsize::new(0));
        let (_event_tx, mut event_rx) = mpsc::channel::<AppEvent>(8);

        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            let polls = polls.clone();
            tokio::select! {
                Some(_) = event_rx.recv() => {}
                Ok(Ok(true)) = tokio::task::spawn_blocking(move || {
                    polls.fetch_add(1, Ordering::SeqCst);
                    io::Result::Ok(false) // no key pending
                }) => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }

        // one initial poll plus roughly one per tick
        assert!(
            polls.load(Ordering::SeqCst) >= 5,
            "input stopped being polled: {} polls in 500ms",
            polls.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn bare_connect_is_a_command_not_a_message() {
        let mut app = test_app();
        let (net_tx, mut net_rx) = mpsc::channel::<ClientFrame>(8);

        let keep_going = app.handle_line("/connect", &net_tx).await.unwrap();
        assert!(keep_going);
        // rejected as a dial with no argument, never transmitted as chat text
        assert!(app.log.iter().any(|l| l.starts_with("Cannot connect")));
        assert!(net_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_with_argument_dials() {
        let mut app = test_app();
        let (net_tx, mut net_rx) = mpsc::channel::<ClientFrame>(8);

        app.handle_line("/connect user-abc123def", &net_tx)
            .await
            .unwrap();
        assert!(matches!(
            net_rx.try_recv(),
            Ok(ClientFrame::Dial { to }) if to == "user-abc123def"
        ));
        assert!(app.session.link("user-abc123def").is_some());
    }

    #[tokio::test]
    async fn failed_dial_leaves_no_registry_entry() {
        let mut app = test_app();
        let (net_tx, _net_rx) = mpsc::channel::<ClientFrame>(8);

        app.dial("user-nobody000", &net_tx).await.unwrap();
        assert!(app.session.link("user-nobody000").is_some());

        app.handle_frame(ServerFrame::Error { code: ErrorCode::PeerNotFound }, &net_tx)
            .await
            .unwrap();
        assert!(app.session.link("user-nobody000").is_none());
    }
}
