//! Observability infrastructure for the fragment pipeline.
//!
//! This crate provides:
//! - `init_tracing` - Structured logging via `tracing-subscriber`
//! - `PipelineMetrics` - Process-wide cache/fetch/render counters
//! - `RenderReport` - Per-render slot timings

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;

// Re-export RequestId and TimingContext from edge-core for convenience
pub use edge_core::{RequestId, TimingContext};
