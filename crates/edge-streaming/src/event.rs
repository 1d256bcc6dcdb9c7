//! Events emitted by a page composition.

use bytes::Bytes;
use edge_cache::CacheStatus;
use edge_core::{FragmentError, RequestId};
use edge_observability::RenderReport;
use serde::Serialize;

/// State of one output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    /// Held by the placeholder while the fragment resolves.
    Pending,
    /// Rendered from data with the given cache provenance.
    Rendered(CacheStatus),
    /// Rendered by the error renderer.
    Failed(FragmentError),
}

impl SlotStatus {
    /// Label used in render reports.
    pub fn label(&self) -> String {
        match self {
            Self::Pending => "PENDING".to_string(),
            Self::Rendered(status) => status.to_string(),
            Self::Failed(_) => "ERROR".to_string(),
        }
    }
}

/// Output of one slot. `index` is the fragment's position in the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOutput {
    pub index: usize,
    pub id: String,
    pub output: Bytes,
    pub status: SlotStatus,
}

impl SlotOutput {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SlotStatus::Failed(_))
    }

    /// Fragment error, if the slot failed.
    pub fn error(&self) -> Option<&FragmentError> {
        match &self.status {
            SlotStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Output as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Final summary carried by the completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositionSummary {
    pub request_id: RequestId,
    /// Number of fragments in the page.
    pub fragments: usize,
    /// Slots rendered by the error renderer.
    pub failed: usize,
    /// Slots served from a stale entry.
    pub stale: usize,
    pub report: RenderReport,
}

/// One event of a composition stream.
///
/// A stream carries exactly one `Fragment` per slot and ends with exactly one
/// `Complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionEvent {
    /// A slot is pending; holds the placeholder output.
    Placeholder(SlotOutput),
    /// Final content of a slot (rendered or error-rendered).
    Fragment(SlotOutput),
    /// Every slot has reported.
    Complete(CompositionSummary),
}

impl CompositionEvent {
    /// Slot carried by the event.
    pub fn slot(&self) -> Option<&SlotOutput> {
        match self {
            Self::Placeholder(slot) | Self::Fragment(slot) => Some(slot),
            Self::Complete(_) => None,
        }
    }

    /// Slot index carried by the event.
    pub fn index(&self) -> Option<usize> {
        self.slot().map(|slot| slot.index)
    }

    /// Check if this is final slot content.
    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}
