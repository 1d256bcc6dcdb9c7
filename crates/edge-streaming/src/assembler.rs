//! Index-ordered document assembly.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::event::{CompositionEvent, SlotOutput};

/// Rebuilds the page from events arriving in any order.
///
/// Final slot content is released strictly in index order: slot `i` is
/// released only once slots `0..i` have been. Placeholders are not
/// part of the document.
#[derive(Debug)]
pub struct DocumentAssembler {
    slots: Vec<Option<SlotOutput>>,
    released: usize,
}

impl DocumentAssembler {
    /// Create an assembler for a page of `slot_count` fragments.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![None; slot_count],
            released: 0,
        }
    }

    /// Apply one event. Returns the slots this event released, in index order.
    pub fn push(&mut self, event: &CompositionEvent) -> Vec<SlotOutput> {
        let CompositionEvent::Fragment(slot) = event else {
            return Vec::new();
        };

        match self.slots.get_mut(slot.index) {
            Some(held @ None) => *held = Some(slot.clone()),
            Some(Some(_)) => {
                warn!(index = slot.index, id = %slot.id, "ignoring repeated slot content");
                return Vec::new();
            }
            None => {
                warn!(index = slot.index, id = %slot.id, slots = self.slots.len(), "slot index out of range");
                return Vec::new();
            }
        }

        let mut released = Vec::new();
        while let Some(Some(slot)) = self.slots.get(self.released) {
            released.push(slot.clone());
            self.released += 1;
        }
        released
    }

    /// Number of slots released so far.
    pub fn released(&self) -> usize {
        self.released
    }

    /// Check if every slot has been released.
    pub fn is_complete(&self) -> bool {
        self.released == self.slots.len()
    }

    /// The released prefix of the document.
    pub fn document(&self) -> Bytes {
        let mut doc = BytesMut::new();
        for slot in self.slots[..self.released].iter().flatten() {
            doc.extend_from_slice(&slot.output);
        }
        doc.freeze()
    }
}
