//! WebSocket client for the `peerboard-broker` service.

use super::{Broker, BrokerEvent, PeerFrame, PeerId, TransportError, TransportResult};
use crate::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Messages sent to the broker.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    Relay { to: &'a PeerId, frame: PeerFrame },
}

/// Messages received from the broker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome { peer_id: PeerId },
    Relay { from: PeerId, frame: PeerFrame },
    PeerNotFound { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    Error { message: String },
}

impl ServerMessage {
    fn into_event(self) -> Option<BrokerEvent> {
        match self {
            ServerMessage::Welcome { peer_id } => Some(BrokerEvent::Assigned(peer_id)),
            ServerMessage::Relay { from, frame } => Some(BrokerEvent::Frame { from, frame }),
            ServerMessage::PeerNotFound { peer_id } => Some(BrokerEvent::PeerNotFound(peer_id)),
            ServerMessage::PeerLeft { peer_id } => Some(BrokerEvent::PeerLeft(peer_id)),
            ServerMessage::Error { message } => {
                log::warn!("Broker error: {}", message);
                None
            }
        }
    }
}

/// Commands sent to the socket thread.
enum Command {
    Send(String),
    Close,
}

/// Broker backend talking to `peerboard-broker` over a WebSocket.
///
/// The socket lives on a background thread; commands and events cross over
/// channels so that `poll` never blocks.
pub struct RelayBroker {
    url: Url,
    registered: bool,
    cmd_tx: Option<Sender<Command>>,
    event_rx: Option<Receiver<BrokerEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayBroker {
    /// Validate `url` without connecting yet.
    pub fn new(url: &str) -> TransportResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::BrokerUnavailable(format!("Invalid URL: {}", e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(TransportError::BrokerUnavailable(format!(
                "Invalid WebSocket URL scheme: {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            registered: false,
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        })
    }

    /// A broker for the endpoint named in `config`.
    pub fn from_config(config: &SessionConfig) -> TransportResult<Self> {
        Self::new(&config.broker_url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.registered = false;
    }
}

impl Broker for RelayBroker {
    fn register(&mut self) -> TransportResult<()> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = channel::<Command>();
        let (event_tx, event_rx) = channel::<BrokerEvent>();
        let url = self.url.to_string();

        let handle = thread::Builder::new()
            .name("peerboard-relay".to_string())
            .spawn(move || run_socket(&url, cmd_rx, event_tx))
            .map_err(|e| TransportError::BrokerUnavailable(e.to_string()))?;

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn relay(&mut self, to: &PeerId, frame: PeerFrame) -> TransportResult<()> {
        if !self.registered {
            return Err(TransportError::NoIdentity);
        }
        let Some(tx) = &self.cmd_tx else {
            return Err(TransportError::BrokerLost);
        };
        let json = serde_json::to_string(&ClientMessage::Relay { to, frame })
            .map_err(|e| TransportError::BrokerUnavailable(e.to_string()))?;
        tx.send(Command::Send(json))
            .map_err(|_| TransportError::BrokerLost)
    }

    fn poll(&mut self) -> Vec<BrokerEvent> {
        let mut events = Vec::new();
        if let Some(rx) = &self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    BrokerEvent::Assigned(_) => self.registered = true,
                    BrokerEvent::Unavailable(_) | BrokerEvent::Closed => self.registered = false,
                    _ => {}
                }
                events.push(event);
            }
        }
        if !self.registered && events.iter().any(|e| {
            matches!(e, BrokerEvent::Unavailable(_) | BrokerEvent::Closed)
        }) {
            self.disconnect();
        }
        events
    }

    fn shutdown(&mut self) {
        self.disconnect();
    }
}

impl Drop for RelayBroker {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// The first 100 characters of a frame, for logging.
fn preview(msg: &str) -> &str {
    match msg.char_indices().nth(100) {
        Some((end, _)) => &msg[..end],
        None => msg,
    }
}

fn run_socket(url: &str, cmd_rx: Receiver<Command>, event_tx: Sender<BrokerEvent>) {
    log::info!("Relay thread: connecting to {}", url);
    let mut socket = match connect(url) {
        Ok((socket, response)) => {
            log::info!("Relay connected, status: {}", response.status());
            socket
        }
        Err(e) => {
            log::error!("Relay connection failed: {}", e);
            let _ = event_tx.send(BrokerEvent::Unavailable(format!("Connection failed: {}", e)));
            return;
        }
    };

    // A short read timeout keeps the loop responsive to outgoing commands.
    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        #[allow(unreachable_patterns)]
        _ => log::debug!("Non-plain stream, using default timeouts"),
    }

    loop {
        match cmd_rx.try_recv() {
            Ok(Command::Send(msg)) => {
                log::debug!("Relay sending: {}", preview(&msg));
                if let Err(e) = socket.send(Message::Text(msg)) {
                    log::error!("Relay send error: {}", e);
                    break;
                }
            }
            Ok(Command::Close) => {
                log::info!("Relay close requested");
                let _ = socket.close(None);
                return;
            }
            Err(TryRecvError::Disconnected) => {
                let _ = socket.close(None);
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        match socket.read() {
            Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                Ok(msg) => {
                    if let Some(event) = msg.into_event() {
                        let _ = event_tx.send(event);
                    }
                }
                Err(e) => log::warn!("Failed to parse broker message: {}", e),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Relay received close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("Relay read error: {}", e);
                break;
            }
        }
    }

    log::info!("Relay thread exiting");
    let _ = event_tx.send(BrokerEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_rejects_non_websocket_url() {
        assert!(matches!(
            RelayBroker::new("http://localhost:3030/ws"),
            Err(TransportError::BrokerUnavailable(_))
        ));
        assert!(RelayBroker::new("not a url").is_err());
        assert!(RelayBroker::new("ws://localhost:3030/ws").is_ok());
    }

    #[test]
    fn test_from_config() {
        let broker = RelayBroker::from_config(&SessionConfig::default()).unwrap();
        assert_eq!(broker.url().as_str(), "ws://localhost:3030/ws");

        let config = SessionConfig {
            broker_url: "https://localhost/ws".to_string(),
            ..SessionConfig::default()
        };
        assert!(RelayBroker::from_config(&config).is_err());
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let to = PeerId::parse(&"é".repeat(60)).unwrap();
        let json = serde_json::to_string(&ClientMessage::Relay {
            to: &to,
            frame: PeerFrame::HangUp { call: Uuid::nil() },
        })
        .unwrap();
        let shown = preview(&json);
        assert_eq!(shown.chars().count(), 100);
        assert!(json.starts_with(shown));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_relay_before_welcome() {
        let mut broker = RelayBroker::new("ws://127.0.0.1:9/ws").unwrap();
        let to = PeerId::parse("x").unwrap();
        assert_eq!(
            broker.relay(&to, PeerFrame::HangUp { call: Uuid::nil() }),
            Err(TransportError::NoIdentity)
        );
    }

    #[test]
    fn test_server_messages() {
        let json = r#"{"type":"relay","from":"abc","frame":{"kind":"accept","connection":"00000000-0000-0000-0000-000000000000"}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.into_event(),
            Some(BrokerEvent::Frame {
                from: PeerId::parse("abc").unwrap(),
                frame: PeerFrame::Accept {
                    connection: Uuid::nil()
                },
            })
        );

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"bad"}"#).unwrap();
        assert_eq!(msg.into_event(), None);
    }

    #[test]
    fn test_client_message_shape() {
        let to = PeerId::parse("abc").unwrap();
        let json = serde_json::to_value(ClientMessage::Relay {
            to: &to,
            frame: PeerFrame::HangUp { call: Uuid::nil() },
        })
        .unwrap();
        assert_eq!(json["type"], "relay");
        assert_eq!(json["to"], "abc");
        assert_eq!(json["frame"]["kind"], "hang_up");
    }
}
