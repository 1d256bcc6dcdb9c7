//! Concurrent page composition.
//!
//! This crate provides:
//! - `Composer` - Resolves every fragment concurrently and streams ordered output
//! - `OrderingStrategy` - Strict or out-of-order content emission
//! - `SlotTracker` - Per-render slot states and emission order
//! - `Fallbacks` - Placeholder and error output

mod composer;
mod config;
mod fallback;
mod ordering;
mod scheduler;

pub use composer::*;
pub use config::*;
pub use fallback::*;
pub use ordering::*;
pub use scheduler::*;

pub use edge_streaming::ComposeError;
