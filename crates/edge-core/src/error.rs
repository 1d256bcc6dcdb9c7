//! Per-fragment failure taxonomy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a single fragment could not produce its output.
///
/// Errors are shared between every subscriber of a coalesced fetch, so they
/// carry rendered messages rather than the source error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FragmentError {
    /// The supplied fetch function rejected.
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// The fetch deadline elapsed before data arrived.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The supplied render function rejected otherwise-valid data.
    #[error("render failed: {0}")]
    RenderFailure(String),

    /// The fetch task terminated without reporting a result.
    #[error("fetch task terminated without a result")]
    Abandoned,
}

impl FragmentError {
    /// Wrap a fetch function's error, keeping its context chain.
    pub fn fetch(err: &anyhow::Error) -> Self {
        Self::FetchFailure(format!("{:#}", err))
    }

    /// Wrap a render function's error, keeping its context chain.
    pub fn render(err: &anyhow::Error) -> Self {
        Self::RenderFailure(format!("{:#}", err))
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchFailure(_) => "fetch_failure",
            Self::Timeout(_) => "timeout",
            Self::RenderFailure(_) => "render_failure",
            Self::Abandoned => "abandoned",
        }
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
