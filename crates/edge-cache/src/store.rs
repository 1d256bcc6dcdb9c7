//! Tiered cache store with lazy expiry and tag invalidation.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use edge_core::Freshness;
use edge_observability::{Counter, PipelineMetrics};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheLookup, EntryState};
use crate::tags::TagIndex;
use crate::ticket::{PendingWrites, TicketState, WriteTicket};
use crate::tier::{CacheTier, MemoryTier};

/// Entries removed by one invalidation.
#[derive(Debug, Default)]
pub struct Eviction {
    /// Removed entries, in `Evicted` state.
    pub entries: Vec<CacheEntry>,
    /// In-flight writes revoked by the invalidation.
    pub revoked_writes: usize,
    /// Keys that had at least one write revoked, sorted.
    pub revoked_keys: Vec<String>,
}

impl Eviction {
    /// Number of entries evicted.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Keys of the evicted entries.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Keys that were evicted or had a write revoked, sorted.
    pub fn touched_keys(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|e| e.key.as_str())
            .chain(self.revoked_keys.iter().map(String::as_str))
            .collect()
    }
}

/// Process-wide fragment cache.
///
/// Every operation on a key runs inside that key's lock stripe, so an entry,
/// its copies across tiers and its tag index membership always change
/// together. Unrelated keys only contend when they hash to the same stripe.
pub struct CacheStore {
    tiers: Vec<Box<dyn CacheTier>>,
    stripes: Box<[Mutex<()>]>,
    tags: TagIndex,
    pending: Arc<PendingWrites>,
    serve_stale: bool,
    max_stale: Option<Duration>,
    metrics: Arc<PipelineMetrics>,
}

impl CacheStore {
    /// Create a single-tier store with default configuration.
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self::from_config(&CacheConfig::default(), metrics)
    }

    /// Create a store with one memory tier per configured tier name.
    pub fn from_config(config: &CacheConfig, metrics: Arc<PipelineMetrics>) -> Self {
        let mut tiers: Vec<Box<dyn CacheTier>> = config
            .tiers
            .iter()
            .map(|name| Box::new(MemoryTier::new(name.as_str())) as Box<dyn CacheTier>)
            .collect();
        if tiers.is_empty() {
            tiers.push(Box::new(MemoryTier::default()));
        }
        Self::with_tiers(tiers, config, metrics)
    }

    /// Create a store over caller-supplied tiers, hottest first.
    pub fn with_tiers(
        tiers: Vec<Box<dyn CacheTier>>,
        config: &CacheConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let stripes = (0..config.lock_stripes.max(1))
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            tiers,
            stripes,
            tags: TagIndex::new(),
            pending: Arc::new(DashMap::new()),
            serve_stale: config.serve_stale,
            max_stale: config.max_stale(),
            metrics,
        }
    }

    fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a key.
    ///
    /// Expiry is checked here rather than by a background sweep. A hit in a
    /// colder tier is copied into every hotter tier.
    pub fn get(&self, key: &str) -> CacheLookup {
        let _guard = self.lock(key);
        let now = Instant::now();

        let Some((depth, entry)) = self.find_locked(key) else {
            self.metrics.incr(Counter::CacheMiss);
            trace!(key, "cache miss");
            return CacheLookup::Miss;
        };

        let lookup = match entry.state(now) {
            EntryState::Fresh => CacheLookup::Fresh(entry.value.clone()),
            EntryState::Stale => {
                let too_old = self
                    .max_stale
                    .map(|window| entry.stale_for(now) > window)
                    .unwrap_or(false);
                if too_old {
                    self.remove_locked(key);
                    self.metrics.incr(Counter::CacheEviction);
                    debug!(key, "stale window exceeded, entry evicted");
                    CacheLookup::Miss
                } else if self.serve_stale {
                    CacheLookup::Stale(entry.value.clone())
                } else {
                    CacheLookup::Miss
                }
            }
            EntryState::Evicted => CacheLookup::Miss,
        };

        match &lookup {
            CacheLookup::Fresh(_) => self.metrics.incr(Counter::CacheHit),
            CacheLookup::Stale(_) => self.metrics.incr(Counter::CacheStaleHit),
            CacheLookup::Miss => self.metrics.incr(Counter::CacheMiss),
        }

        if !lookup.is_miss() && depth > 0 {
            for tier in &self.tiers[..depth] {
                tier.insert(entry.clone());
            }
            trace!(key, depth, "promoted entry to hotter tiers");
        }

        trace!(key, status = %lookup.status(), "cache lookup");
        lookup
    }

    /// Store a value, replacing any prior entry for `key`.
    ///
    /// `NoCache` values are never stored.
    pub fn put<I, S>(&self, key: &str, value: Bytes, tags: I, freshness: Freshness)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !freshness.is_cacheable() {
            return;
        }
        let tags = tags.into_iter().map(Into::into).collect();
        let _guard = self.lock(key);
        self.put_locked(key, value, tags, freshness);
    }

    /// Reserve a write for `key` that invalidation can revoke.
    pub fn reserve<I, S>(&self, key: &str, tags: I) -> WriteTicket
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        let _guard = self.lock(key);
        WriteTicket::register(key, tags, &self.pending)
    }

    /// Write through a reserved ticket.
    ///
    /// Returns false if the ticket was revoked or the policy is `NoCache`.
    pub fn commit(&self, ticket: WriteTicket, value: Bytes, freshness: Freshness) -> bool {
        if !freshness.is_cacheable() {
            return false;
        }
        let _guard = self.lock(ticket.key());
        if ticket.is_revoked() {
            debug!(key = ticket.key(), "dropping write revoked by invalidation");
            return false;
        }
        self.put_locked(ticket.key(), value, ticket.tags().clone(), freshness);
        true
    }

    /// Evict one key. Returns 1 if an entry existed, else 0.
    pub fn invalidate_key(&self, key: &str) -> usize {
        self.evict_key(key).count()
    }

    /// Evict every key currently tagged `tag`. Returns the number evicted.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.evict_tag(tag).count()
    }

    /// Evict one key and revoke its in-flight writes.
    pub fn evict_key(&self, key: &str) -> Eviction {
        let _guard = self.lock(key);
        let entry = self.remove_locked(key);
        let revoked_writes = self.revoke_locked(key, |_| true);
        let revoked_keys = if revoked_writes > 0 {
            vec![key.to_string()]
        } else {
            Vec::new()
        };
        self.finish_eviction(entry.into_iter().collect(), revoked_writes, revoked_keys)
    }

    /// Evict every key tagged `tag` and revoke matching in-flight writes.
    ///
    /// Each key is evicted inside its own lock, so a concurrent `get` sees
    /// either the whole old entry or a miss.
    pub fn evict_tag(&self, tag: &str) -> Eviction {
        let mut keys: BTreeSet<String> = self.tags.keys(tag).into_iter().collect();
        keys.extend(
            self.pending
                .iter()
                .filter(|tickets| tickets.value().iter().any(|t| t.tags.contains(tag)))
                .map(|tickets| tickets.key().clone()),
        );

        let mut entries = Vec::new();
        let mut revoked_writes = 0;
        let mut revoked_keys = Vec::new();
        for key in keys {
            let _guard = self.lock(&key);
            let still_tagged = self
                .find_locked(&key)
                .map(|(_, entry)| entry.has_tag(tag))
                .unwrap_or(false);
            let evicted = if still_tagged {
                self.remove_locked(&key)
            } else {
                None
            };
            let key_evicted = evicted.is_some();
            let revoked = self.revoke_locked(&key, |t| key_evicted || t.tags.contains(tag));
            entries.extend(evicted);
            if revoked > 0 {
                revoked_writes += revoked;
                revoked_keys.push(key);
            }
        }

        debug!(tag, evicted = entries.len(), revoked_writes, "tag invalidated");
        self.finish_eviction(entries, revoked_writes, revoked_keys)
    }

    /// Drop every entry and revoke every in-flight write.
    pub fn clear(&self) {
        let _guards: Vec<_> = self
            .stripes
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        for tier in &self.tiers {
            tier.clear();
        }
        self.tags.clear();
        for tickets in self.pending.iter() {
            for ticket in tickets.value() {
                ticket.revoke();
            }
        }
    }

    /// Check if an entry exists for `key`, whatever its freshness.
    pub fn contains(&self, key: &str) -> bool {
        let _guard = self.lock(key);
        self.find_locked(key).is_some()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.tiers.last().map(|t| t.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently indexed under `tag`, sorted.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags.keys(tag)
    }

    /// Tags of the entry for `key`.
    pub fn tags_for_key(&self, key: &str) -> Option<BTreeSet<String>> {
        let _guard = self.lock(key);
        self.find_locked(key).map(|(_, entry)| entry.tags)
    }

    /// Number of outstanding write reservations for `key`.
    pub fn pending_writes(&self, key: &str) -> usize {
        self.pending.get(key).map(|t| t.len()).unwrap_or(0)
    }

    /// Tier at `depth` (0 is hottest).
    pub fn tier(&self, depth: usize) -> Option<&dyn CacheTier> {
        self.tiers.get(depth).map(|t| t.as_ref())
    }

    /// Whether stale entries are reported as `Stale`.
    pub fn serves_stale(&self) -> bool {
        self.serve_stale
    }

    fn find_locked(&self, key: &str) -> Option<(usize, CacheEntry)> {
        self.tiers
            .iter()
            .enumerate()
            .find_map(|(depth, tier)| tier.get(key).map(|entry| (depth, entry)))
    }

    fn put_locked(&self, key: &str, value: Bytes, tags: BTreeSet<String>, freshness: Freshness) {
        let previous = self.find_locked(key).map(|(_, entry)| entry);
        let entry = CacheEntry::new(key, value, tags, freshness);

        for tier in &self.tiers {
            tier.insert(entry.clone());
        }

        if let Some(previous) = &previous {
            self.tags.remove(key, previous.tags.difference(&entry.tags));
        }
        self.tags.add(key, &entry.tags);
        self.metrics.incr(Counter::CachePut);

        debug!(
            key,
            %freshness,
            tags = entry.tags.len(),
            replaced = previous.is_some(),
            "cache entry written"
        );
    }

    fn remove_locked(&self, key: &str) -> Option<CacheEntry> {
        let mut removed = None;
        for tier in &self.tiers {
            if let Some(entry) = tier.remove(key) {
                removed.get_or_insert(entry);
            }
        }
        let removed = removed?;
        self.tags.remove(key, &removed.tags);
        Some(removed.into_evicted())
    }

    fn revoke_locked(&self, key: &str, matches: impl Fn(&TicketState) -> bool) -> usize {
        self.pending
            .get(key)
            .map(|tickets| {
                tickets
                    .iter()
                    .filter(|t| matches(t) && t.revoke())
                    .count()
            })
            .unwrap_or(0)
    }

    fn finish_eviction(
        &self,
        entries: Vec<CacheEntry>,
        revoked_writes: usize,
        revoked_keys: Vec<String>,
    ) -> Eviction {
        self.metrics.add(Counter::CacheEviction, entries.len() as u64);
        self.metrics.add(Counter::RevokedWrite, revoked_writes as u64);
        for entry in &entries {
            debug!(key = %entry.key, "cache entry evicted");
        }
        Eviction {
            entries,
            revoked_writes,
            revoked_keys,
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("tiers", &self.tiers.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("stripes", &self.stripes.len())
            .field("len", &self.len())
            .field("serve_stale", &self.serve_stale)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(PipelineMetrics::new()))
    }

    fn store_with(config: CacheConfig) -> CacheStore {
        CacheStore::from_config(&config, Arc::new(PipelineMetrics::new()))
    }

    fn v(s: &'static str) -> Bytes {
        Bytes::from(s)
    }

    const NO_TAGS: [&str; 0] = [];

    #[test]
    fn test_put_then_get_fresh() {
        let store = store();
        store.put("a", v("1"), ["x"], Freshness::StaticCache);

        assert_eq!(store.get("a"), CacheLookup::Fresh(v("1")));
        assert_eq!(store.len(), 1);
        assert!(store.contains("a"));
        assert!(store.get("b").is_miss());
    }

    #[test]
    fn test_no_cache_is_never_stored() {
        let store = store();
        store.put("a", v("1"), ["x"], Freshness::NoCache);

        assert!(store.get("a").is_miss());
        assert!(store.keys_for_tag("x").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_entry_fresh_then_stale() {
        let store = store();
        store.put("a", v("1"), NO_TAGS, Freshness::timed(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(49)).await;
        assert!(store.get("a").is_fresh());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(store.get("a"), CacheLookup::Stale(v("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_is_miss_without_swr() {
        let store = store_with(CacheConfig::default().without_stale());
        store.put("a", v("1"), NO_TAGS, Freshness::timed(Duration::from_millis(50)));

        assert!(store.get("a").is_fresh());
        tokio::time::advance(Duration::from_millis(51)).await;
        assert!(store.get("a").is_miss());
        // still superseded by the next put, not swept
        assert!(store.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_stale_window_evicts() {
        let store = store_with(CacheConfig::default().with_max_stale(Duration::from_millis(100)));
        store.put("a", v("1"), ["t"], Freshness::timed(Duration::from_millis(10)));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(store.get("a").is_stale());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(store.get("a").is_miss());
        assert!(!store.contains("a"));
        assert!(store.keys_for_tag("t").is_empty());
    }

    #[test]
    fn test_invalidate_tag_scenario() {
        let store = store();
        store.put("p1", v("v"), ["products"], Freshness::StaticCache);
        store.put("h1", v("h"), ["home"], Freshness::StaticCache);

        assert_eq!(store.invalidate_tag("products"), 1);
        assert!(store.get("p1").is_miss());
        assert!(store.get("h1").is_fresh());
        assert!(store.keys_for_tag("products").is_empty());
    }

    #[test]
    fn test_invalidate_tag_shared_by_many_keys() {
        let store = store();
        for key in ["a", "b", "c"] {
            store.put(key, v("x"), ["shared", key], Freshness::StaticCache);
        }

        let eviction = store.evict_tag("shared");
        assert_eq!(eviction.count(), 3);
        assert_eq!(eviction.keys(), vec!["a", "b", "c"]);
        assert!(eviction
            .entries
            .iter()
            .all(|e| e.state(Instant::now()) == EntryState::Evicted));
        // per-key tags are cleaned up too
        assert!(store.keys_for_tag("a").is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalidate_key_is_idempotent() {
        let store = store();
        store.put("a", v("1"), ["t"], Freshness::StaticCache);

        assert_eq!(store.invalidate_key("a"), 1);
        assert_eq!(store.invalidate_key("a"), 0);
        assert_eq!(store.invalidate_tag("t"), 0);
        assert_eq!(store.invalidate_tag("never-used"), 0);
    }

    #[test]
    fn test_put_moves_tag_membership() {
        let store = store();
        store.put("a", v("1"), ["old", "kept"], Freshness::StaticCache);
        store.put("a", v("2"), ["kept", "new"], Freshness::StaticCache);

        assert!(store.keys_for_tag("old").is_empty());
        assert_eq!(store.keys_for_tag("kept"), vec!["a".to_string()]);
        assert_eq!(store.keys_for_tag("new"), vec!["a".to_string()]);
        assert_eq!(store.get("a"), CacheLookup::Fresh(v("2")));

        // invalidating the dropped tag must not touch the entry
        assert_eq!(store.invalidate_tag("old"), 0);
        assert!(store.get("a").is_fresh());
    }

    #[test]
    fn test_cold_hit_is_promoted() {
        let store = store_with(CacheConfig::default().with_tiers(&["hot", "cold"]));
        store.put("a", v("1"), ["t"], Freshness::StaticCache);

        let hot = store.tier(0).unwrap();
        assert_eq!(hot.name(), "hot");
        hot.remove("a");
        assert!(hot.get("a").is_none());

        assert!(store.get("a").is_fresh());
        assert!(store.tier(0).unwrap().get("a").is_some());

        assert_eq!(store.invalidate_key("a"), 1);
        assert!(store.tier(0).unwrap().is_empty());
        assert!(store.tier(1).unwrap().is_empty());
    }

    #[test]
    fn test_commit_writes_unrevoked_ticket() {
        let store = store();
        let ticket = store.reserve("a", ["t"]);
        assert_eq!(store.pending_writes("a"), 1);

        assert!(store.commit(ticket, v("1"), Freshness::StaticCache));
        assert_eq!(store.pending_writes("a"), 0);
        assert_eq!(store.tags_for_key("a").unwrap().len(), 1);
    }

    #[test]
    fn test_invalidate_key_revokes_in_flight_write() {
        let store = store();
        store.put("a", v("old"), NO_TAGS, Freshness::StaticCache);
        let ticket = store.reserve("a", NO_TAGS);

        let eviction = store.evict_key("a");
        assert_eq!(eviction.count(), 1);
        assert_eq!(eviction.revoked_writes, 1);
        assert_eq!(eviction.touched_keys().len(), 1);

        assert!(!store.commit(ticket, v("new"), Freshness::StaticCache));
        assert!(store.get("a").is_miss());
    }

    #[test]
    fn test_invalidate_tag_revokes_uncached_in_flight_write() {
        let store = store();
        let tagged = store.reserve("a", ["products"]);
        let untagged = store.reserve("b", ["home"]);

        let eviction = store.evict_tag("products");
        assert_eq!(eviction.count(), 0);
        assert_eq!(eviction.revoked_writes, 1);
        assert_eq!(eviction.revoked_keys, vec!["a".to_string()]);
        assert_eq!(eviction.touched_keys().into_iter().collect::<Vec<_>>(), ["a"]);

        assert!(!store.commit(tagged, v("1"), Freshness::StaticCache));
        assert!(store.commit(untagged, v("2"), Freshness::StaticCache));
        assert!(store.get("a").is_miss());
        assert!(store.get("b").is_fresh());
    }

    #[test]
    fn test_reservation_after_invalidation_is_kept() {
        let store = store();
        store.put("a", v("old"), ["t"], Freshness::StaticCache);
        store.invalidate_tag("t");

        let ticket = store.reserve("a", ["t"]);
        assert!(store.commit(ticket, v("new"), Freshness::StaticCache));
        assert_eq!(store.get("a"), CacheLookup::Fresh(v("new")));
    }

    #[test]
    fn test_clear_revokes_everything() {
        let store = store();
        store.put("a", v("1"), ["t"], Freshness::StaticCache);
        let ticket = store.reserve("b", NO_TAGS);

        store.clear();
        assert!(store.is_empty());
        assert!(store.keys_for_tag("t").is_empty());
        assert!(!store.commit(ticket, v("2"), Freshness::StaticCache));
    }

    #[test]
    fn test_metrics_are_recorded() {
        let metrics = Arc::new(PipelineMetrics::new());
        let store = CacheStore::new(metrics.clone());
        store.put("a", v("1"), ["t"], Freshness::StaticCache);
        store.get("a");
        store.get("b");
        store.invalidate_tag("t");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache.puts, 1);
        assert_eq!(snapshot.cache.hits, 1);
        assert_eq!(snapshot.cache.misses, 1);
        assert_eq!(snapshot.cache.evictions, 1);
    }

    #[test]
    fn test_concurrent_put_and_invalidate_keep_index_consistent() {
        let store = Arc::new(store_with(CacheConfig {
            lock_stripes: 4,
            ..CacheConfig::default()
        }));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", i % 16);
                        match (worker + i) % 4 {
                            0 => store.invalidate_tag("even"),
                            1 => store.invalidate_key(&key),
                            _ => {
                                let tag = if i % 2 == 0 { "even" } else { "odd" };
                                store.put(&key, Bytes::from("x"), [tag], Freshness::StaticCache);
                                0
                            }
                        };
                        let _ = store.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..16 {
            let key = format!("k{}", i);
            let tags = store.tags_for_key(&key).unwrap_or_default();
            for tag in ["even", "odd"] {
                let indexed = store.keys_for_tag(tag).contains(&key);
                assert_eq!(indexed, tags.contains(tag), "key {} tag {}", key, tag);
            }
        }
    }
}
