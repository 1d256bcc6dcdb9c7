//! Per-render slot bookkeeping.

use edge_streaming::SlotOutput;

use crate::ordering::{by_priority, OrderingStrategy};

/// Status of a slot within one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for its fetch.
    Pending,
    /// Content rendered, not yet emitted.
    Ready,
    /// Content emitted.
    Emitted,
}

/// What the driver should emit next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Hold the slot at this index with its placeholder.
    Placeholder(usize),
    /// Emit final slot content.
    Fragment(SlotOutput),
}

/// Tracks which slots are pending, ready and emitted, and decides emission
/// order for a strategy.
#[derive(Debug)]
pub struct SlotTracker {
    ordering: OrderingStrategy,
    priorities: Vec<i32>,
    states: Vec<SlotState>,
    ready: Vec<Option<SlotOutput>>,
    placeholders: Vec<bool>,
    /// Lowest index not yet emitted (strict ordering).
    next: usize,
}

impl SlotTracker {
    /// Track a render whose slots have the given priorities, in index order.
    pub fn new(ordering: OrderingStrategy, priorities: Vec<i32>) -> Self {
        let n = priorities.len();
        Self {
            ordering,
            priorities,
            states: vec![SlotState::Pending; n],
            ready: vec![None; n],
            placeholders: vec![false; n],
            next: 0,
        }
    }

    /// Record rendered content for a slot. Repeats are ignored.
    pub fn ready(&mut self, slot: SlotOutput) {
        let index = slot.index;
        if self.states.get(index) == Some(&SlotState::Pending) {
            self.states[index] = SlotState::Ready;
            self.ready[index] = Some(slot);
        }
    }

    /// Take everything that can be emitted now, in emission order.
    pub fn drain(&mut self) -> Vec<Emission> {
        match self.ordering {
            OrderingStrategy::Strict => self.drain_strict(),
            OrderingStrategy::OutOfOrder => self.drain_out_of_order(),
        }
    }

    fn drain_strict(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        while let Some(slot) = self.ready.get_mut(self.next).and_then(Option::take) {
            self.states[self.next] = SlotState::Emitted;
            out.push(Emission::Fragment(slot));
            self.next += 1;
        }
        if self.next < self.states.len() && !self.placeholders[self.next] {
            self.placeholders[self.next] = true;
            out.push(Emission::Placeholder(self.next));
        }
        out
    }

    fn drain_out_of_order(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        for index in 0..self.states.len() {
            if self.states[index] == SlotState::Pending && !self.placeholders[index] {
                self.placeholders[index] = true;
                out.push(Emission::Placeholder(index));
            }
        }

        let mut batch: Vec<(usize, i32)> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == SlotState::Ready)
            .map(|(index, _)| (index, self.priorities[index]))
            .collect();
        by_priority(&mut batch);

        for (index, _) in batch {
            if let Some(slot) = self.ready[index].take() {
                self.states[index] = SlotState::Emitted;
                out.push(Emission::Fragment(slot));
            }
        }
        out
    }

    /// Check if every slot has been emitted.
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| *s == SlotState::Emitted)
    }

    /// Indices of slots still waiting for data.
    pub fn pending(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == SlotState::Pending)
            .map(|(i, _)| i)
            .collect()
    }

    /// Get slot status by index.
    pub fn status(&self, index: usize) -> Option<&SlotState> {
        self.states.get(index)
    }
}
