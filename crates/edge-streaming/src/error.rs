//! Composition and output errors.

use thiserror::Error;

/// Errors of a composition request as a whole.
///
/// Individual fragment failures never surface here; they are rendered into
/// their slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// Two descriptors in one request share an id.
    #[error("duplicate fragment id {0:?}")]
    DuplicateFragment(String),

    /// The render stopped before emitting its completion marker.
    #[error("composition cancelled before completion")]
    Cancelled,
}

/// Errors writing composed output to a byte sink.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("sink write failed: {0}")]
    Sink(String),

    #[error("output already completed")]
    AlreadyComplete,

    #[error(transparent)]
    Compose(#[from] ComposeError),
}
