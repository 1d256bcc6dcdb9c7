//! Core abstractions for the fragment pipeline.
//!
//! This crate provides the fundamental types and traits:
//! - `FragmentDescriptor` - A unit of content with its freshness policy
//! - `Fetcher` / `Renderer` - Caller-supplied data and markup seams
//! - `FragmentError` - Per-fragment failure taxonomy
//! - `RequestId` / `TimingContext` - Request correlation and timing

mod context;
mod descriptor;
mod error;
mod fetch;
mod lifecycle;

pub use context::*;
pub use descriptor::*;
pub use error::*;
pub use fetch::*;
pub use lifecycle::*;
