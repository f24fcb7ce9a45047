//! Peer discovery and connection brokering.
//!
//! A [`Broker`] is the wire to the rendezvous service: it obtains a peer id
//! and relays opaque [`PeerFrame`]s to another id. [`PeerClient`] builds the
//! two-party session surface on top of it (one data channel, one media call).

mod client;
mod loopback;
#[cfg(not(target_arch = "wasm32"))]
mod relay;

pub use client::{ClientEvent, PeerClient};
pub use loopback::{LoopbackBroker, LoopbackNetwork};
#[cfg(not(target_arch = "wasm32"))]
pub use relay::RelayBroker;

use crate::media::StreamDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Signaling errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),
    #[error("Peer {0} rejected the connection")]
    Rejected(PeerId),
    #[error("Handshake timed out")]
    HandshakeTimeout,
    #[error("Invalid peer id: {0:?}")]
    InvalidPeerId(String),
    #[error("No identity assigned yet")]
    NoIdentity,
    #[error("A connection is already active")]
    AlreadyConnected,
    #[error("Broker connection lost")]
    BrokerLost,
}

/// Result type for signaling operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Identifier issued by the broker and shared out-of-band with the other party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Validate user input as a peer id.
    ///
    /// The input is taken verbatim: no trimming and no case folding. Empty
    /// input and input containing whitespace or control characters is rejected.
    pub fn parse(input: &str) -> TransportResult<Self> {
        if input.is_empty() || input.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TransportError::InvalidPeerId(input.to_string()));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one data channel; chosen by the peer that opens it.
pub type ConnectionId = Uuid;

/// Identifies one media call; chosen by the caller.
pub type CallId = Uuid;

/// Frames exchanged between two peers through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerFrame {
    /// Open a data channel.
    Connect { connection: ConnectionId },
    /// The channel is open on the accepting side.
    Accept { connection: ConnectionId },
    /// The accepting side refuses (already busy).
    Reject { connection: ConnectionId },
    /// A protocol message, carried verbatim.
    Data { connection: ConnectionId, payload: String },
    /// Close the channel.
    Close { connection: ConnectionId },
    /// Offer a media call.
    Call { call: CallId, stream: Option<StreamDescriptor> },
    /// Answer a media call.
    Answer { call: CallId, stream: Option<StreamDescriptor> },
    /// End or decline a media call.
    HangUp { call: CallId },
}

/// Events produced by a broker backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// The broker issued our id.
    Assigned(PeerId),
    /// A frame relayed from another peer.
    Frame { from: PeerId, frame: PeerFrame },
    /// A frame could not be delivered: the id is unknown.
    PeerNotFound(PeerId),
    /// A peer we exchanged frames with went away.
    PeerLeft(PeerId),
    /// The broker could not be reached.
    Unavailable(String),
    /// The broker connection dropped after registration.
    Closed,
}

/// Connection to the rendezvous service.
pub trait Broker {
    /// Request an id. Completion is reported as [`BrokerEvent::Assigned`].
    fn register(&mut self) -> TransportResult<()>;

    /// Relay a frame to another peer.
    fn relay(&mut self, to: &PeerId, frame: PeerFrame) -> TransportResult<()>;

    /// Poll for pending events (non-blocking).
    fn poll(&mut self) -> Vec<BrokerEvent>;

    /// Drop the registration and release the id.
    fn shutdown(&mut self);
}

/// An established (or establishing) data channel to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote: PeerId,
}

/// The media call leg paired with a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCall {
    pub id: CallId,
    pub remote: PeerId,
    /// True when this side placed the call.
    pub outbound: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_verbatim() {
        let id = PeerId::parse("AbC-123").unwrap();
        assert_eq!(id.as_str(), "AbC-123");
        assert_ne!(id, PeerId::parse("abc-123").unwrap());
    }

    #[test]
    fn test_peer_id_rejects_whitespace() {
        for bad in ["", " abc", "abc ", "a b", "abc\n", "a\u{7}"] {
            assert!(
                matches!(PeerId::parse(bad), Err(TransportError::InvalidPeerId(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_frame_serialize() {
        let frame = PeerFrame::Data {
            connection: Uuid::nil(),
            payload: r#"{"type":"CLEAR_BOARD"}"#.to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"data""#));
        let back: PeerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
