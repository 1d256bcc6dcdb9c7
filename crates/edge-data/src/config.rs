//! Fetch configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fetch scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Deadline for fragments that do not set their own (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl FetchConfig {
    /// Create from a default deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Default deadline as a duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
