//! Render lifecycle tracking.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle phases of one page render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Render accepted, fragment resolution started.
    Start,
    /// A slot's placeholder was emitted.
    PlaceholderSent(String),
    /// A slot's content (or error output) was emitted.
    SlotSent(String),
    /// Completion marker emitted.
    Completion,
    /// The consumer went away before completion.
    Cancelled,
}

/// Timing context for observability.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: HashMap<String, Instant>,
}

impl TimingContext {
    /// Create a new timing context.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: HashMap::new(),
        }
    }

    /// Record a timing mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Mark a slot's data as ready.
    pub fn mark_slot_ready(&mut self, slot: &str) {
        self.mark(&format!("slot_{}_ready", slot));
    }

    /// Mark a slot's content as emitted.
    pub fn mark_slot_sent(&mut self, slot: &str) {
        self.mark(&format!("slot_{}_sent", slot));
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get time of a named mark relative to start.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks.get(name).map(|t| t.duration_since(self.start))
    }

    /// Get time to first emitted slot.
    pub fn time_to_first_slot(&self) -> Option<Duration> {
        self.marks
            .iter()
            .filter(|(k, _)| k.starts_with("slot_") && k.ends_with("_sent"))
            .map(|(_, t)| t.duration_since(self.start))
            .min()
    }

    /// Get timing for a specific slot.
    pub fn slot_timing(&self, slot: &str) -> Option<SlotTiming> {
        let ready = self.since_start(&format!("slot_{}_ready", slot))?;
        let sent = self.since_start(&format!("slot_{}_sent", slot))?;

        Some(SlotTiming {
            name: slot.to_string(),
            ready,
            sent,
            held: sent.saturating_sub(ready),
        })
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing information for a slot.
#[derive(Debug, Clone)]
pub struct SlotTiming {
    /// Fragment id.
    pub name: String,
    /// Time from render start until the data was ready.
    pub ready: Duration,
    /// Time from render start until the content was emitted.
    pub sent: Duration,
    /// Time the ready content waited for earlier slots.
    pub held: Duration,
}
