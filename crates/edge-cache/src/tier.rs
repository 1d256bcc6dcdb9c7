//! Storage tiers behind the cache store.

use dashmap::DashMap;

use crate::entry::CacheEntry;

/// A storage tier.
///
/// Tiers are plain key→entry maps; expiry, tag indexing and per-key
/// serialization are the store's job. A tier must be owned by exactly one
/// `CacheStore`, since the store's key locks only cover its own mutations.
pub trait CacheTier: Send + Sync {
    /// Tier name (for logs).
    fn name(&self) -> &str;

    /// Get an entry.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Store an entry, replacing any prior entry for its key.
    fn insert(&self, entry: CacheEntry);

    /// Remove an entry.
    fn remove(&self, key: &str) -> Option<CacheEntry>;

    /// Number of entries held.
    fn len(&self) -> usize;

    /// Check if the tier is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    fn clear(&self);
}

/// In-process memory tier.
#[derive(Debug)]
pub struct MemoryTier {
    name: String,
    entries: DashMap<String, CacheEntry>,
}

impl MemoryTier {
    /// Create a new memory tier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn insert(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
