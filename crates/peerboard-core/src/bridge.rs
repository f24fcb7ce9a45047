//! Bridge between local document mutations and the sync protocol.
//!
//! Outbound, local edits become protocol messages queued for the data
//! channel. Edits arrive either as typed [`DocumentCommand`]s, which describe
//! their own intent, or as a whole replacement sequence handed to
//! [`SyncBridge::commit`], in which case the intent is inferred by comparing
//! the previous and next sequences. Inbound, protocol messages are applied to
//! the local document, with image elements rehydrated in the background.

use crate::document::{Document, DocumentCommand};
use crate::element::{CanvasElement, ElementId, ElementPatch};
use crate::protocol::SyncMessage;
use crate::raster::{RasterState, Rehydrator};
use std::collections::HashSet;
use std::time::Duration;

/// Infer the message describing the change from `prev` to `next`.
///
/// A longer `next` is taken as an append of its last element; a shorter one
/// as the removal of the first id missing from it. Same-length changes
/// (moves, resizes) are not inferred and need an explicit update.
pub fn infer_delta(prev: &[CanvasElement], next: &[CanvasElement]) -> Option<SyncMessage> {
    if next.len() > prev.len() {
        next.last().cloned().map(SyncMessage::AddElement)
    } else if next.len() < prev.len() {
        let remaining: HashSet<ElementId> = next.iter().map(CanvasElement::id).collect();
        prev.iter()
            .map(CanvasElement::id)
            .find(|id| !remaining.contains(id))
            .map(SyncMessage::RemoveElement)
    } else {
        None
    }
}

/// Turns local edits into outbound messages and applies inbound ones.
pub struct SyncBridge {
    /// Messages waiting to be sent, oldest first.
    outgoing: Vec<SyncMessage>,
    rehydrator: Rehydrator,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self {
            outgoing: Vec::new(),
            rehydrator: Rehydrator::new(),
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<SyncMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Queue a message that does not come from a document edit (snapshots, handshakes).
    pub fn queue(&mut self, message: SyncMessage) {
        self.outgoing.push(message);
    }

    // --- Local edits ---

    /// Apply a local command and queue the messages describing its effect.
    ///
    /// Returns true if the document changed.
    pub fn apply_local(&mut self, doc: &mut Document, command: DocumentCommand) -> bool {
        match command {
            DocumentCommand::Add(element) => self.add_local(doc, element),
            DocumentCommand::AddBatch(elements) => {
                let mut changed = false;
                for element in elements {
                    changed |= self.add_local(doc, element);
                }
                changed
            }
            DocumentCommand::Remove(id) => self.remove_local(doc, id),
            DocumentCommand::RemoveMany(ids) => {
                let mut changed = false;
                for id in ids {
                    changed |= self.remove_local(doc, id);
                }
                changed
            }
            DocumentCommand::Update(patch) => self.update_element(doc, patch),
            DocumentCommand::Clear => {
                doc.clear();
                self.outgoing.push(SyncMessage::ClearBoard);
                true
            }
            DocumentCommand::Undo => match doc.undo() {
                Some(id) => {
                    self.outgoing.push(SyncMessage::RemoveElement(id));
                    true
                }
                None => false,
            },
            DocumentCommand::Redo => match doc.redo() {
                Some(element) => {
                    self.outgoing.push(SyncMessage::AddElement(element));
                    true
                }
                None => false,
            },
        }
    }

    fn add_local(&mut self, doc: &mut Document, element: CanvasElement) -> bool {
        let pending = element
            .as_image()
            .filter(|image| !image.is_renderable())
            .map(|image| (image.id(), image.src.clone()));
        let id = element.id();
        let message = SyncMessage::AddElement(element.clone());
        if !doc.push(element) {
            log::warn!("Ignoring local add of existing element {}", id);
            return false;
        }
        doc.discard_redo();
        if let Some((id, src)) = pending {
            self.rehydrator.submit(id, src);
        }
        self.outgoing.push(message);
        true
    }

    fn remove_local(&mut self, doc: &mut Document, id: ElementId) -> bool {
        if doc.get(id).is_some_and(CanvasElement::is_locked) {
            log::debug!("Element {} is locked, not removing", id);
            return false;
        }
        match doc.remove(id) {
            Some(_) => {
                self.outgoing.push(SyncMessage::RemoveElement(id));
                true
            }
            None => false,
        }
    }

    /// Explicit update path for moves and resizes, which array diffing cannot see.
    ///
    /// Locked elements only accept patches that toggle the lock itself.
    pub fn update_element(&mut self, doc: &mut Document, patch: ElementPatch) -> bool {
        let locked = match doc.get(patch.id) {
            Some(element) => element.is_locked(),
            None => return false,
        };
        if locked && !patch.only_touches_lock() {
            log::debug!("Element {} is locked, refusing update", patch.id);
            return false;
        }
        if !doc.apply_patch(&patch) {
            return false;
        }
        self.outgoing.push(SyncMessage::UpdateElement(patch));
        true
    }

    /// Replace the document with `next`, inferring the message from the difference.
    ///
    /// Returns the inferred message, which is also queued. A `next` that drops a
    /// locked element is refused and leaves the document untouched.
    pub fn commit(&mut self, doc: &mut Document, next: Vec<CanvasElement>) -> Option<SyncMessage> {
        let kept: HashSet<ElementId> = next.iter().map(CanvasElement::id).collect();
        if let Some(locked) = doc
            .elements()
            .iter()
            .find(|e| e.is_locked() && !kept.contains(&e.id()))
        {
            log::debug!("Element {} is locked, refusing commit", locked.id());
            return None;
        }
        let delta = infer_delta(doc.elements(), &next);
        for image in next.iter().filter_map(CanvasElement::as_image) {
            let known = doc
                .get(image.id())
                .and_then(CanvasElement::as_image)
                .is_some_and(|old| old.src == image.src);
            if !known && !image.is_renderable() {
                self.rehydrator.submit(image.id(), image.src.clone());
            }
        }
        doc.set_elements(next);
        if let Some(message) = &delta {
            if matches!(message, SyncMessage::AddElement(_)) {
                doc.discard_redo();
            }
            self.outgoing.push(message.clone());
        }
        delta
    }

    // --- Inbound ---

    /// Apply a message received from the remote peer.
    ///
    /// Unknown ids and duplicate adds are no-ops. Returns true if the
    /// document changed.
    pub fn apply_remote(&mut self, doc: &mut Document, message: SyncMessage) -> bool {
        match message {
            SyncMessage::SyncFullState(elements) => {
                let elements = elements
                    .into_iter()
                    .map(|element| self.rehydrate(element))
                    .collect();
                doc.replace_all(elements);
                true
            }
            SyncMessage::AddElement(element) => {
                if doc.contains(element.id()) {
                    log::debug!("Ignoring duplicate add of {}", element.id());
                    return false;
                }
                let element = self.rehydrate(element);
                doc.push(element)
            }
            SyncMessage::RemoveElement(id) => doc.remove(id).is_some(),
            SyncMessage::UpdateElement(patch) => doc.apply_patch(&patch),
            SyncMessage::ClearBoard => {
                doc.clear();
                true
            }
            SyncMessage::PeerReady => false,
        }
    }

    /// Mark an inbound image pending and queue its decode.
    fn rehydrate(&mut self, mut element: CanvasElement) -> CanvasElement {
        if let Some(image) = element.as_image_mut() {
            image.set_raster(RasterState::Pending);
            self.rehydrator.submit(image.id(), image.src.clone());
        }
        element
    }

    // --- Rehydration ---

    /// Apply finished decodes to the document without blocking.
    ///
    /// Returns the number of elements that changed state.
    pub fn poll_rehydration(&mut self, doc: &mut Document) -> usize {
        let done = self.rehydrator.poll();
        Self::apply_rehydrated(doc, done)
    }

    /// Block until pending decodes finish or `timeout` elapses, then apply them.
    pub fn wait_rehydration(&mut self, doc: &mut Document, timeout: Duration) -> usize {
        let done = self.rehydrator.wait(timeout);
        Self::apply_rehydrated(doc, done)
    }

    /// Number of decodes still running.
    pub fn pending_rehydrations(&self) -> usize {
        self.rehydrator.in_flight()
    }

    fn apply_rehydrated(doc: &mut Document, done: Vec<crate::raster::Rehydrated>) -> usize {
        let mut applied = 0;
        for item in done {
            // The element may have been removed, cleared, or replaced meanwhile.
            let Some(image) = doc.get_mut(item.id).and_then(CanvasElement::as_image_mut) else {
                continue;
            };
            if image.src != item.src {
                continue;
            }
            match item.result {
                Ok(raster) => image.set_raster(RasterState::Ready(raster)),
                Err(e) => {
                    log::warn!("Image {} could not be decoded: {}", item.id, e);
                    image.set_raster(RasterState::Failed);
                }
            }
            applied += 1;
        }
        applied
    }
}

impl Default for SyncBridge {
    fn default() -> Self {
        Self::new()
    }
}
