//! Streaming output for page composition.
//!
//! This crate provides:
//! - `CompositionEvent` - Placeholder, fragment and completion events
//! - `CompositionStream` - Event stream of one page render
//! - `CompletionHandle` - Resolves when the completion marker is emitted
//! - `DocumentAssembler` - Index-ordered byte prefix from any event order
//! - `StreamingSink` - Writes the assembled prefix to a byte sink

mod assembler;
mod completion;
mod error;
mod event;
mod sink;
mod stream;

pub use assembler::*;
pub use completion::*;
pub use error::*;
pub use event::*;
pub use sink::*;
pub use stream::*;
