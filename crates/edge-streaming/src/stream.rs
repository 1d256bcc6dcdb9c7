//! Event stream of one page render.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::assembler::DocumentAssembler;
use crate::error::ComposeError;
use crate::event::{CompositionEvent, CompositionSummary, SlotOutput};

/// Events of one render, in emission order.
///
/// Dropping the stream cancels the render.
#[derive(Debug)]
pub struct CompositionStream {
    inner: ReceiverStream<CompositionEvent>,
    slot_count: usize,
}

impl CompositionStream {
    /// Wrap the receiving end of a render's event channel.
    pub fn new(rx: mpsc::Receiver<CompositionEvent>, slot_count: usize) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            slot_count,
        }
    }

    /// Number of slots in the page.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Drain the stream into a `CompositionResult`.
    pub async fn collect(mut self) -> Result<CompositionResult, ComposeError> {
        let mut events = Vec::new();
        let mut slots: Vec<Option<SlotOutput>> = vec![None; self.slot_count];

        while let Some(event) = self.next().await {
            match &event {
                CompositionEvent::Fragment(slot) => {
                    if let Some(held) = slots.get_mut(slot.index) {
                        *held = Some(slot.clone());
                    }
                }
                CompositionEvent::Complete(summary) => {
                    let summary = summary.clone();
                    events.push(event);
                    return Ok(CompositionResult {
                        events,
                        slots: slots.into_iter().flatten().collect(),
                        summary,
                    });
                }
                CompositionEvent::Placeholder(_) => {}
            }
            events.push(event);
        }

        Err(ComposeError::Cancelled)
    }
}

impl Stream for CompositionStream {
    type Item = CompositionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A fully drained render.
#[derive(Debug, Clone)]
pub struct CompositionResult {
    /// Every event, in emission order, ending with the completion marker.
    pub events: Vec<CompositionEvent>,
    slots: Vec<SlotOutput>,
    pub summary: CompositionSummary,
}

impl CompositionResult {
    /// Final content of every slot, in index order.
    pub fn slots(&self) -> &[SlotOutput] {
        &self.slots
    }

    /// Final content of the fragment with the given id.
    pub fn slot(&self, id: &str) -> Option<&SlotOutput> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    /// Content events only, in emission order.
    pub fn fragments(&self) -> impl Iterator<Item = &SlotOutput> {
        self.events.iter().filter_map(|event| match event {
            CompositionEvent::Fragment(slot) => Some(slot),
            _ => None,
        })
    }

    /// The page: slot outputs concatenated in index order.
    pub fn document(&self) -> Bytes {
        let mut assembler = DocumentAssembler::new(self.slots.len());
        for slot in &self.slots {
            assembler.push(&CompositionEvent::Fragment(slot.clone()));
        }
        assembler.document()
    }
}
