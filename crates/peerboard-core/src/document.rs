//! Board document and local undo state.

use crate::element::{CanvasElement, ElementId, ElementPatch};

/// Maximum number of undone elements to keep for redo.
const MAX_UNDO_HISTORY: usize = 50;

/// Elements set aside by undo, newest last.
///
/// Purely local: never serialized and never sent to the remote peer.
#[derive(Debug, Clone, Default)]
pub struct UndoBuffer {
    items: Vec<CanvasElement>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, element: CanvasElement) {
        self.items.push(element);
        if self.items.len() > MAX_UNDO_HISTORY {
            self.items.remove(0);
        }
    }

    fn pop(&mut self) -> Option<CanvasElement> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// A typed description of one local document mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    /// Append one element.
    Add(CanvasElement),
    /// Append several elements, in order.
    AddBatch(Vec<CanvasElement>),
    /// Remove one element.
    Remove(ElementId),
    /// Remove several elements.
    RemoveMany(Vec<ElementId>),
    /// Move, resize, restyle or (un)lock an element.
    Update(ElementPatch),
    /// Remove everything, including the undo buffer.
    Clear,
    /// Set the newest element aside.
    Undo,
    /// Restore the most recently undone element.
    Redo,
}

/// The ordered collection of elements shown on the board.
///
/// Order is append order and doubles as z-order (back to front).
/// Ids are unique.
#[derive(Debug, Clone, Default)]
pub struct Document {
    elements: Vec<CanvasElement>,
    undo: UndoBuffer,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements in z-order (back to front).
    pub fn elements(&self) -> &[CanvasElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn ids(&self) -> Vec<ElementId> {
        self.elements.iter().map(CanvasElement::id).collect()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.id() == id)
    }

    pub fn get(&self, id: ElementId) -> Option<&CanvasElement> {
        self.elements.iter().find(|e| e.id() == id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut CanvasElement> {
        self.elements.iter_mut().find(|e| e.id() == id)
    }

    /// Append an element.
    ///
    /// Returns false, leaving the document untouched, if the id is already present.
    pub fn push(&mut self, element: CanvasElement) -> bool {
        if self.contains(element.id()) {
            return false;
        }
        self.elements.push(element);
        true
    }

    /// Remove an element, returning it if it was present.
    pub fn remove(&mut self, id: ElementId) -> Option<CanvasElement> {
        let pos = self.position(id)?;
        Some(self.elements.remove(pos))
    }

    /// Merge a patch into the element it names.
    ///
    /// Returns true if the element exists and something changed.
    pub fn apply_patch(&mut self, patch: &ElementPatch) -> bool {
        match self.get_mut(patch.id) {
            Some(element) => element.merge(patch),
            None => false,
        }
    }

    /// Replace the whole content. Later duplicates of an id are dropped.
    ///
    /// The undo buffer is discarded since it described the replaced content.
    pub fn replace_all(&mut self, elements: Vec<CanvasElement>) {
        self.elements.clear();
        for element in elements {
            let id = element.id();
            if !self.push(element) {
                log::warn!("Dropping duplicate element {} from snapshot", id);
            }
        }
        self.undo.clear();
    }

    /// Replace the content while keeping the undo buffer.
    pub(crate) fn set_elements(&mut self, elements: Vec<CanvasElement>) {
        let undo = std::mem::take(&mut self.undo);
        self.replace_all(elements);
        self.undo = undo;
    }

    /// Remove all elements and the undo buffer.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.undo.clear();
    }

    /// Set the newest element aside. Returns its id.
    ///
    /// Does nothing if the newest element is locked.
    pub fn undo(&mut self) -> Option<ElementId> {
        if self.elements.last()?.is_locked() {
            return None;
        }
        let element = self.elements.pop()?;
        let id = element.id();
        self.undo.push(element);
        Some(id)
    }

    /// Restore the most recently undone element. Returns a copy of it.
    ///
    /// An undone element whose id has reappeared meanwhile is discarded.
    pub fn redo(&mut self) -> Option<CanvasElement> {
        while let Some(element) = self.undo.pop() {
            if self.push(element.clone()) {
                return Some(element);
            }
        }
        None
    }

    /// Check if undo is available.
    pub fn can_undo(&self) -> bool {
        self.elements.last().is_some_and(|e| !e.is_locked())
    }

    /// Check if redo is available.
    pub fn can_redo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn undo_buffer(&self) -> &UndoBuffer {
        &self.undo
    }

    /// A new local element invalidates redo.
    pub(crate) fn discard_redo(&mut self) {
        self.undo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ImageElement, PathElement};
    use crate::raster::Raster;
    use kurbo::Point;

    fn path() -> CanvasElement {
        PathElement::from_points(vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]).into()
    }

    #[test]
    fn test_document_creation() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert!(!doc.can_undo());
        assert!(!doc.can_redo());
    }

    #[test]
    fn test_push_rejects_duplicate_id() {
        let mut doc = Document::new();
        let a = path();
        assert!(doc.push(a.clone()));
        assert!(!doc.push(a));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut doc = Document::new();
        let (a, b, c) = (path(), path(), path());
        doc.push(a.clone());
        doc.push(b.clone());
        doc.push(c.clone());

        assert!(doc.remove(b.id()).is_some());
        assert_eq!(doc.ids(), vec![a.id(), c.id()]);
        assert!(doc.remove(b.id()).is_none());
    }

    #[test]
    fn test_undo_redo() {
        let mut doc = Document::new();
        let (a, b) = (path(), path());
        doc.push(a.clone());
        doc.push(b.clone());

        assert_eq!(doc.undo(), Some(b.id()));
        assert_eq!(doc.ids(), vec![a.id()]);
        assert!(doc.can_redo());

        let restored = doc.redo().unwrap();
        assert_eq!(restored.id(), b.id());
        assert_eq!(doc.ids(), vec![a.id(), b.id()]);
        assert!(!doc.can_redo());
    }

    #[test]
    fn test_undo_stops_at_locked_element() {
        let mut doc = Document::new();
        let raster = Raster::from_rgba(1, 1, vec![0, 0, 0, 255]).unwrap();
        let img: CanvasElement = ImageElement::from_raster(Point::ZERO, raster).unwrap().into();
        let id = img.id();
        doc.push(path());
        doc.push(img);
        assert!(doc.apply_patch(&ElementPatch::lock(id, true)));

        assert!(!doc.can_undo());
        assert_eq!(doc.undo(), None);
        assert_eq!(doc.len(), 2);
        assert!(!doc.can_redo());
    }

    #[test]
    fn test_redo_skips_reappeared_ids() {
        let mut doc = Document::new();
        let a = path();
        doc.push(a.clone());
        doc.undo();
        // The same element arrives again from the peer.
        doc.push(a.clone());
        assert!(doc.redo().is_none());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_undo_history_is_bounded() {
        let mut doc = Document::new();
        for _ in 0..(MAX_UNDO_HISTORY + 10) {
            doc.push(path());
        }
        while doc.undo().is_some() {}
        assert_eq!(doc.undo_buffer().len(), MAX_UNDO_HISTORY);
    }

    #[test]
    fn test_clear_discards_undo() {
        let mut doc = Document::new();
        doc.push(path());
        doc.push(path());
        doc.undo();
        doc.clear();
        assert!(doc.is_empty());
        assert!(doc.redo().is_none());
    }

    #[test]
    fn test_replace_all_dedupes() {
        let mut doc = Document::new();
        let a = path();
        let b = path();
        doc.replace_all(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(doc.ids(), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_patch_unknown_id_is_noop() {
        let mut doc = Document::new();
        doc.push(path());
        let before = doc.elements().to_vec();
        let patch = ElementPatch::with_points(uuid::Uuid::new_v4(), vec![]);
        assert!(!doc.apply_patch(&patch));
        assert_eq!(doc.elements(), before.as_slice());
    }
}
