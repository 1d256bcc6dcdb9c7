//! Byte output for composed pages.

use std::fmt::Display;

use bytes::Bytes;
use edge_core::{LifecyclePhase, TimingContext};
use futures::{Sink, SinkExt, StreamExt};
use tracing::debug;

use crate::assembler::DocumentAssembler;
use crate::error::{ComposeError, StreamError};
use crate::event::{CompositionEvent, CompositionSummary};
use crate::stream::CompositionStream;

/// State of the streaming sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Completed,
    Cancelled,
}

/// Writes a page to a byte sink as its index-ordered prefix grows.
///
/// This is generic over the underlying sink type to work with any
/// `Sink<Vec<u8>>` implementation, such as an HTTP response body.
///
/// By default only final slot content is written, so the bytes are exactly
/// the document. With `with_placeholders` the sink also writes the
/// placeholder of the slot it is currently blocked on, ahead of that slot's
/// content; the client is then responsible for replacing it.
pub struct StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    inner: S,
    state: SinkState,
    assembler: DocumentAssembler,
    timing: TimingContext,
    slots_sent: Vec<String>,
    placeholders: Option<Vec<Option<Bytes>>>,
    slot_count: usize,
}

impl<S, E> StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    /// Create a sink for a page of `slot_count` fragments.
    pub fn new(sink: S, slot_count: usize, timing: TimingContext) -> Self {
        Self {
            inner: sink,
            state: SinkState::Open,
            assembler: DocumentAssembler::new(slot_count),
            timing,
            slots_sent: Vec::new(),
            placeholders: None,
            slot_count,
        }
    }

    /// Also write the head-of-line placeholder while its slot is pending.
    pub fn with_placeholders(mut self) -> Self {
        self.placeholders = Some(vec![None; self.slot_count]);
        self
    }

    /// Apply one event, writing any slots it released.
    ///
    /// Returns the number of slots written.
    pub async fn send_event(&mut self, event: &CompositionEvent) -> Result<usize, StreamError> {
        if self.state != SinkState::Open {
            return Err(StreamError::AlreadyComplete);
        }

        if let CompositionEvent::Complete(summary) = event {
            self.inner
                .flush()
                .await
                .map_err(|e| StreamError::Sink(e.to_string()))?;
            self.state = SinkState::Completed;
            self.timing.mark("complete");
            debug!(request_id = %summary.request_id, slots = self.slots_sent.len(), "output complete");
            return Ok(0);
        }

        if let CompositionEvent::Placeholder(slot) = event {
            if let Some(held) = self
                .placeholders
                .as_mut()
                .and_then(|held| held.get_mut(slot.index))
            {
                *held = Some(slot.output.clone());
            }
        }

        let released = self.assembler.push(event);
        for slot in &released {
            self.write(slot.output.to_vec()).await?;
            self.timing.mark_slot_sent(&slot.id);
            self.slots_sent.push(slot.id.clone());
        }
        self.write_head_placeholder().await?;
        Ok(released.len())
    }

    /// Write the held placeholder of the first unreleased slot, once.
    async fn write_head_placeholder(&mut self) -> Result<(), StreamError> {
        let head = self.assembler.released();
        let held = self
            .placeholders
            .as_mut()
            .and_then(|held| held.get_mut(head))
            .and_then(Option::take);
        match held {
            Some(bytes) if !bytes.is_empty() => {
                self.write(bytes.to_vec()).await?;
                self.timing.mark(&format!("slot_{head}_placeholder_sent"));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), StreamError> {
        self.inner
            .send(chunk)
            .await
            .map_err(|e| StreamError::Sink(e.to_string()))
    }

    /// Write every event of `stream`, returning its summary.
    ///
    /// Fails with `ComposeError::Cancelled` if the stream ends without a
    /// completion marker.
    pub async fn pipe(&mut self, mut stream: CompositionStream) -> Result<CompositionSummary, StreamError> {
        while let Some(event) = stream.next().await {
            self.send_event(&event).await?;
            if let CompositionEvent::Complete(summary) = event {
                return Ok(summary);
            }
        }
        self.state = SinkState::Cancelled;
        Err(ComposeError::Cancelled.into())
    }

    /// Ids of the slots written, in order.
    pub fn slots_sent(&self) -> &[String] {
        &self.slots_sent
    }

    /// Get the current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        match self.state {
            SinkState::Completed => LifecyclePhase::Completion,
            SinkState::Cancelled => LifecyclePhase::Cancelled,
            SinkState::Open => match self.slots_sent.last() {
                Some(id) => LifecyclePhase::SlotSent(id.clone()),
                None => LifecyclePhase::Start,
            },
        }
    }

    /// Get timing context reference.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// Consume the sink and return the inner value.
    pub fn into_inner(self) -> S {
        self.inner
    }
}
