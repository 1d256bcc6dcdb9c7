//! Cache store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Report stale entries as `Stale` (stale-while-revalidate) instead of `Miss`.
    #[serde(default = "default_true")]
    pub serve_stale: bool,

    /// How long past expiry a stale entry may still be served.
    /// Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stale_ms: Option<u64>,

    /// Number of key lock stripes.
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,

    /// Tier names, hottest first.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_lock_stripes() -> usize {
    64
}

fn default_tiers() -> Vec<String> {
    vec!["memory".to_string()]
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            serve_stale: true,
            max_stale_ms: None,
            lock_stripes: default_lock_stripes(),
            tiers: default_tiers(),
        }
    }
}

impl CacheConfig {
    /// Disable stale-while-revalidate.
    pub fn without_stale(mut self) -> Self {
        self.serve_stale = false;
        self
    }

    /// Bound the stale window.
    pub fn with_max_stale(mut self, window: Duration) -> Self {
        self.max_stale_ms = Some(window.as_millis() as u64);
        self
    }

    /// Set tier names, hottest first.
    pub fn with_tiers(mut self, tiers: &[&str]) -> Self {
        self.tiers = tiers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Stale window as a duration.
    pub fn max_stale(&self) -> Option<Duration> {
        self.max_stale_ms.map(Duration::from_millis)
    }
}
