//! Peerboard rendezvous broker
//!
//! Issues peer ids over WebSocket and relays opaque frames between them.
//! The broker never looks inside a frame; board data only ever passes
//! through it as part of a `relay`.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! // server → client, once the socket opens
//! { "type": "welcome", "peer_id": "<uuid>" }
//! // client → server
//! { "type": "relay", "to": "<peer id>", "frame": { ... } }
//! // server → client
//! { "type": "relay", "from": "<peer id>", "frame": { ... } }
//! { "type": "peer_not_found", "peer_id": "<peer id>" }
//! { "type": "peer_left", "peer_id": "<peer id>" }
//! { "type": "error", "message": "..." }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames queued per peer before new ones are dropped.
const PEER_QUEUE: usize = 256;

/// A message sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Forward `frame` to another peer.
    Relay { to: String, frame: serde_json::Value },
}

/// A message sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The id issued to this connection.
    Welcome { peer_id: String },
    /// A frame from another peer.
    Relay { from: String, frame: serde_json::Value },
    /// The target of a relay is not connected.
    PeerNotFound { peer_id: String },
    /// A peer this client exchanged frames with disconnected.
    PeerLeft { peer_id: String },
    /// Error message
    Error { message: String },
}

/// A connected peer.
struct Peer {
    tx: mpsc::Sender<ServerMessage>,
    /// Peers that sent frames to, or received frames from, this one.
    contacts: HashSet<String>,
}

/// Shared application state
#[derive(Default)]
pub struct AppState {
    peers: DashMap<String, Peer>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn register(&self, peer_id: &str, tx: mpsc::Sender<ServerMessage>) {
        self.peers.insert(
            peer_id.to_string(),
            Peer {
                tx,
                contacts: HashSet::new(),
            },
        );
    }

    /// Forward a frame. Returns false if `to` is not connected.
    ///
    /// Relaying is best effort: a frame for a peer whose queue is full is dropped.
    fn relay(&self, from: &str, to: &str, frame: serde_json::Value) -> bool {
        // One map guard at a time: both ids may live in the same shard.
        {
            let Some(mut target) = self.peers.get_mut(to) else {
                return false;
            };
            target.contacts.insert(from.to_string());
            let msg = ServerMessage::Relay {
                from: from.to_string(),
                frame,
            };
            match target.tx.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Queue for {} is full, dropping frame from {}", to, from);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        if let Some(mut sender) = self.peers.get_mut(from) {
            sender.contacts.insert(to.to_string());
        }
        true
    }

    /// Remove a peer and tell its contacts.
    fn unregister(&self, peer_id: &str) {
        let Some((_, peer)) = self.peers.remove(peer_id) else {
            return;
        };
        for contact in peer.contacts {
            if let Some(mut other) = self.peers.get_mut(&contact) {
                other.contacts.remove(peer_id);
                let _ = other.tx.try_send(ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                });
            }
        }
    }
}

/// Build the broker router with fresh state.
pub fn router() -> Router {
    router_with_state(Arc::new(AppState::new()))
}

/// Build the broker router around existing state.
pub fn router_with_state(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Peerboard Broker - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn to_text(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize {:?}: {}", msg, e);
            None
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(PEER_QUEUE);
    state.register(&peer_id, tx.clone());

    let welcome = ServerMessage::Welcome {
        peer_id: peer_id.clone(),
    };
    let _ = tx.try_send(welcome);

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Relay { to, frame }) => {
                                debug!("Relay {} -> {}", peer_id, to);
                                if !state.relay(&peer_id, &to, frame) {
                                    let _ = tx.try_send(ServerMessage::PeerNotFound { peer_id: to });
                                }
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer_id, e);
                                let _ = tx.try_send(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore binary, ping, pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            // Forward messages addressed to this peer
            Some(server_msg) = rx.recv() => {
                if let Some(text) = to_text(&server_msg) {
                    if sender.send(text).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    state.unregister(&peer_id);
    info!("Connection closed: {}", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer(state: &AppState, id: &str) -> mpsc::Receiver<ServerMessage> {
        peer_with_queue(state, id, PEER_QUEUE)
    }

    fn peer_with_queue(state: &AppState, id: &str, capacity: usize) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(capacity);
        state.register(id, tx);
        rx
    }

    #[test]
    fn test_message_shapes() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"relay","to":"b","frame":{"kind":"close"}}"#).unwrap();
        let ClientMessage::Relay { to, frame } = msg;
        assert_eq!(to, "b");
        assert_eq!(frame["kind"], "close");

        let json = serde_json::to_value(ServerMessage::PeerNotFound {
            peer_id: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "peer_not_found", "peer_id": "x"}));
    }

    #[test]
    fn test_relay_and_leave() {
        let state = AppState::new();
        let mut a = peer(&state, "a");
        let mut b = peer(&state, "b");
        let mut c = peer(&state, "c");

        assert!(state.relay("a", "b", json!({"kind": "connect"})));
        assert_eq!(
            b.try_recv().unwrap(),
            ServerMessage::Relay {
                from: "a".to_string(),
                frame: json!({"kind": "connect"})
            }
        );
        assert!(!state.relay("a", "nobody", json!({})));

        state.unregister("a");
        state.unregister("a");
        assert_eq!(
            b.try_recv().unwrap(),
            ServerMessage::PeerLeft {
                peer_id: "a".to_string()
            }
        );
        assert!(c.try_recv().is_err());
        assert!(a.try_recv().is_err());
        assert_eq!(state.peer_count(), 2);
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let state = AppState::new();
        let _a = peer(&state, "a");
        let mut slow = peer_with_queue(&state, "slow", 1);

        assert!(state.relay("a", "slow", json!({"n": 1})));
        assert!(state.relay("a", "slow", json!({"n": 2})));
        assert_eq!(
            slow.try_recv().unwrap(),
            ServerMessage::Relay {
                from: "a".to_string(),
                frame: json!({"n": 1})
            }
        );
        assert!(slow.try_recv().is_err());

        drop(slow);
        assert!(!state.relay("a", "slow", json!({"n": 3})));
    }
}
