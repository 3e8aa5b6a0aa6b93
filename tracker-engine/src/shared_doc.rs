//! Sharing the document between the GUI thread and the audio thread.
//!
//! Only the GUI thread writes. It builds the new document outside any lock
//! (document construction is unbounded work) and publishes by swapping an
//! `Arc` under a mutex, so the audio thread's read path (lock, clone the
//! `Arc`, unlock) is bounded regardless of document size.

use crate::doc::Document;
use std::sync::{Arc, Mutex};

/// Anything that can hand the renderer the current document snapshot.
///
/// `current_document()` must be bounded-time and must never return a
/// half-edited state; an undo/redo history container implements this by
/// publishing complete snapshots only.
pub trait DocumentSource {
    fn current_document(&self) -> Arc<Document>;
}

/// A fixed document, for previews and tests.
impl DocumentSource for Arc<Document> {
    fn current_document(&self) -> Arc<Document> {
        Arc::clone(self)
    }
}

/// The GUI-owned publication point.
#[derive(Debug)]
pub struct SharedDocument {
    current: Mutex<Arc<Document>>,
}

impl SharedDocument {
    #[must_use]
    pub fn new(doc: Document) -> Arc<Self> {
        Arc::new(Self { current: Mutex::new(Arc::new(doc)) })
    }

    /// Publish a new snapshot. GUI thread only; the lock is held only across
    /// the pointer swap.
    pub fn publish(&self, doc: Document) {
        *self.current.lock().expect("document publisher panicked") = Arc::new(doc);
    }
}

impl DocumentSource for Arc<SharedDocument> {
    fn current_document(&self) -> Arc<Document> {
        Arc::clone(&self.current.lock().expect("document publisher panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::ChipKind;

    #[test]
    fn publish_swaps_the_snapshot() {
        let shared = SharedDocument::new(Document::new(vec![ChipKind::Spc700]));
        let before = shared.current_document();
        assert_eq!(before.chips, vec![ChipKind::Spc700]);

        shared.publish(Document::new(vec![ChipKind::Nes2A03]));
        let after = shared.current_document();
        assert_eq!(after.chips, vec![ChipKind::Nes2A03]);
        // The old snapshot stays valid for readers still holding it
        assert_eq!(before.chips, vec![ChipKind::Spc700]);
    }
}
