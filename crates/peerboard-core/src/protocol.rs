//! Wire vocabulary of the board data channel.
//!
//! Messages are JSON objects `{"type": TAG, "payload": ...}`:
//! ```json
//! { "type": "SYNC_FULL_STATE", "payload": [ { "type": "path", ... } ] }
//! { "type": "ADD_ELEMENT", "payload": { "type": "image", "src": "data:image/png;base64,...", ... } }
//! { "type": "REMOVE_ELEMENT", "payload": "<uuid>" }
//! { "type": "UPDATE_ELEMENT", "payload": { "id": "<uuid>", "position": { "x": 1, "y": 2 } } }
//! { "type": "CLEAR_BOARD" }
//! { "type": "PEER_READY" }
//! ```
//! Image elements carry their pixels as a data URI only; the decoded raster
//! never crosses the wire.

use crate::element::{CanvasElement, ElementId, ElementPatch};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid element {id}: {reason}")]
    InvalidElement { id: ElementId, reason: &'static str },
}

/// A message exchanged over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// Replace the receiver's whole document.
    SyncFullState(Vec<CanvasElement>),
    /// Append an element unless its id is already present.
    AddElement(CanvasElement),
    /// Remove an element if present.
    RemoveElement(ElementId),
    /// Merge fields into an existing element.
    UpdateElement(ElementPatch),
    /// Empty the document and the undo buffer.
    ClearBoard,
    /// Sent by the guest once its end of the channel is open.
    PeerReady,
}

impl SyncMessage {
    /// The wire tag, used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            SyncMessage::SyncFullState(_) => "SYNC_FULL_STATE",
            SyncMessage::AddElement(_) => "ADD_ELEMENT",
            SyncMessage::RemoveElement(_) => "REMOVE_ELEMENT",
            SyncMessage::UpdateElement(_) => "UPDATE_ELEMENT",
            SyncMessage::ClearBoard => "CLEAR_BOARD",
            SyncMessage::PeerReady => "PEER_READY",
        }
    }
}

/// Serialize a message for the data channel.
pub fn encode(message: &SyncMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Parse and validate a message received from the data channel.
pub fn decode(text: &str) -> Result<SyncMessage, ProtocolError> {
    let message: SyncMessage = serde_json::from_str(text)?;
    validate(&message)?;
    Ok(message)
}

fn validate(message: &SyncMessage) -> Result<(), ProtocolError> {
    match message {
        SyncMessage::SyncFullState(elements) => elements.iter().try_for_each(validate_element),
        SyncMessage::AddElement(element) => validate_element(element),
        SyncMessage::UpdateElement(patch) if !patch.is_well_formed() => {
            Err(ProtocolError::InvalidElement {
                id: patch.id,
                reason: "non-finite or negative geometry",
            })
        }
        _ => Ok(()),
    }
}

fn validate_element(element: &CanvasElement) -> Result<(), ProtocolError> {
    let ok = match element {
        CanvasElement::Path(path) => path.is_well_formed(),
        CanvasElement::Image(image) => image.is_well_formed(),
    };
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidElement {
            id: element.id(),
            reason: match element {
                CanvasElement::Path(_) => "non-finite stroke geometry",
                CanvasElement::Image(_) => "bad geometry or image data URI",
            },
        })
    }
}
