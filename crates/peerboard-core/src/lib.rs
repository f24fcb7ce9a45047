//! Peerboard Core Library
//!
//! Peer session and document synchronization engine for a two-party shared
//! whiteboard: element model, wire protocol, change-detection bridge,
//! signaling client and session state machine.

pub mod bridge;
pub mod config;
pub mod document;
pub mod element;
pub mod import;
pub mod media;
pub mod protocol;
pub mod raster;
pub mod session;
pub mod signaling;

pub use bridge::{SyncBridge, infer_delta};
pub use config::{ConfigError, SessionConfig};
pub use document::{Document, DocumentCommand, UndoBuffer};
pub use element::{CanvasElement, ElementId, ElementPatch, ImageElement, PathElement, SerializableColor};
pub use import::{ImportError, PageImport, PageRaster};
pub use media::{LocalStream, MediaDevices, MediaError, MediaTrack, StreamDescriptor, acquire_local_stream};
pub use protocol::{ProtocolError, SyncMessage};
pub use raster::{Raster, RasterError, RasterState};
pub use session::{ConnectionState, Role, Session, SessionError, SessionNotice};
pub use signaling::{Broker, LoopbackBroker, LoopbackNetwork, PeerClient, PeerId, TransportError};
#[cfg(not(target_arch = "wasm32"))]
pub use signaling::RelayBroker;
