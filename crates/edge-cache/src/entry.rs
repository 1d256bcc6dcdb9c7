//! Cache entries and lookup results.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use edge_core::Freshness;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Within its TTL (or static).
    Fresh,
    /// Past its TTL; servable only with stale-while-revalidate.
    Stale,
    /// Removed by invalidation or supersession.
    Evicted,
}

/// A cached fragment entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Opaque fetched data.
    pub value: Bytes,
    /// Invalidation tags.
    pub tags: BTreeSet<String>,
    /// When the entry was written.
    pub created_at: Instant,
    /// When the entry turns stale; `None` for static entries.
    pub expires_at: Option<Instant>,
    evicted: bool,
}

impl CacheEntry {
    /// Create an entry written now.
    pub fn new(
        key: impl Into<String>,
        value: Bytes,
        tags: BTreeSet<String>,
        freshness: Freshness,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            key: key.into(),
            value,
            tags,
            created_at,
            expires_at: freshness.ttl().map(|ttl| created_at + ttl),
            evicted: false,
        }
    }

    /// State of the entry at `now`.
    pub fn state(&self, now: Instant) -> EntryState {
        if self.evicted {
            return EntryState::Evicted;
        }
        match self.expires_at {
            Some(expires_at) if now > expires_at => EntryState::Stale,
            _ => EntryState::Fresh,
        }
    }

    /// How long the entry has been stale at `now`.
    pub fn stale_for(&self, now: Instant) -> Duration {
        self.expires_at
            .map(|expires_at| now.saturating_duration_since(expires_at))
            .unwrap_or_default()
    }

    /// Get age at `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Check if the entry carries a tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub(crate) fn into_evicted(mut self) -> Self {
        self.evicted = true;
        self
    }
}

/// Status of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fresh cache hit.
    Hit,
    /// Stale hit (serving while revalidating).
    Stale,
    /// Cache miss.
    Miss,
    /// Bypass - caching disabled.
    Bypass,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Stale => write!(f, "STALE"),
            Self::Miss => write!(f, "MISS"),
            Self::Bypass => write!(f, "BYPASS"),
        }
    }
}

/// Result of `CacheStore::get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Entry within its TTL.
    Fresh(Bytes),
    /// Entry past its TTL, served under stale-while-revalidate.
    Stale(Bytes),
    /// No servable entry.
    Miss,
}

impl CacheLookup {
    /// The cached value, if any.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Fresh(v) | Self::Stale(v) => Some(v),
            Self::Miss => None,
        }
    }

    /// Consume into the cached value.
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            Self::Fresh(v) | Self::Stale(v) => Some(v),
            Self::Miss => None,
        }
    }

    /// Lookup status.
    pub fn status(&self) -> CacheStatus {
        match self {
            Self::Fresh(_) => CacheStatus::Hit,
            Self::Stale(_) => CacheStatus::Stale,
            Self::Miss => CacheStatus::Miss,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}
