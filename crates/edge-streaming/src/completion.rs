//! Completion signal of a page render.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::ComposeError;
use crate::event::CompositionSummary;

/// Sending half, held by the composition driver.
pub type CompletionSender = oneshot::Sender<CompositionSummary>;

/// Create a linked sender and handle.
pub fn completion_channel() -> (CompletionSender, CompletionHandle) {
    let (tx, rx) = oneshot::channel();
    (tx, CompletionHandle { rx })
}

/// Resolves once the completion marker has been emitted.
///
/// Resolves with `ComposeError::Cancelled` if the render stops first, for
/// example because its event stream was dropped.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<CompositionSummary>,
}

impl Future for CompletionHandle {
    type Output = Result<CompositionSummary, ComposeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ComposeError::Cancelled))
    }
}
