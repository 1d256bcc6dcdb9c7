//! Tag and key invalidation.
//!
//! Invalidation evicts matching entries and revokes writes reserved by fetches
//! still in flight. Those fetches are detached from the scheduler: they keep
//! running and still answer the renders already waiting on them, but their
//! results never reach the cache and later renders start a new fetch.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use edge_cache::CacheStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::scheduler::FetchScheduler;

/// What to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationSelector {
    /// Every entry carrying the tag.
    Tag(String),
    /// A single cache key.
    Key(String),
}

impl InvalidationSelector {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }
}

impl fmt::Display for InvalidationSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "tag:{tag}"),
            Self::Key(key) => write!(f, "key:{key}"),
        }
    }
}

/// Error parsing an `InvalidationSelector`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorParseError {
    #[error("selector must look like `tag:<name>` or `key:<name>`, got {0:?}")]
    Malformed(String),
    #[error("unknown selector kind {0:?}, expected `tag` or `key`")]
    UnknownKind(String),
    #[error("selector {0:?} has an empty name")]
    EmptyName(String),
}

impl FromStr for InvalidationSelector {
    type Err = SelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| SelectorParseError::Malformed(s.to_string()))?;
        if name.is_empty() {
            return Err(SelectorParseError::EmptyName(s.to_string()));
        }
        // Keys may themselves contain ':' (product:1:reviews); only the first
        // separator splits.
        match kind {
            "tag" => Ok(Self::Tag(name.to_string())),
            "key" => Ok(Self::Key(name.to_string())),
            other => Err(SelectorParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Outcome of one invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub selector: InvalidationSelector,
    /// Entries removed from the cache.
    pub evicted_count: usize,
    /// In-flight writes revoked.
    pub revoked_writes: usize,
    /// Matched keys whose in-flight fetch was detached. Those fetches finish
    /// for their current subscribers without writing to the cache.
    pub in_flight: usize,
    /// Evicted keys, sorted.
    pub keys: Vec<String>,
}

/// Applies invalidations to the cache.
#[derive(Debug, Clone)]
pub struct Revalidator {
    store: Arc<CacheStore>,
    scheduler: FetchScheduler,
}

impl Revalidator {
    pub fn new(store: Arc<CacheStore>, scheduler: FetchScheduler) -> Self {
        Self { store, scheduler }
    }

    /// Evict everything matching `selector`.
    ///
    /// Renders already holding data keep it. Renders that start afterwards
    /// miss and fetch again.
    pub fn invalidate(&self, selector: &InvalidationSelector) -> InvalidationReport {
        let eviction = match selector {
            InvalidationSelector::Tag(tag) => self.store.evict_tag(tag),
            InvalidationSelector::Key(key) => self.store.evict_key(key),
        };

        let mut keys: Vec<String> = eviction.keys().into_iter().map(str::to_string).collect();
        keys.sort();

        let mut touched = eviction.touched_keys();
        if let InvalidationSelector::Key(key) = selector {
            // NoCache fetches hold no ticket, so eviction never reports them
            touched.insert(key.as_str());
        }
        let in_flight = touched
            .into_iter()
            .filter(|key| self.scheduler.detach(key))
            .count();

        let report = InvalidationReport {
            selector: selector.clone(),
            evicted_count: eviction.count(),
            revoked_writes: eviction.revoked_writes,
            in_flight,
            keys,
        };
        info!(
            selector = %report.selector,
            evicted = report.evicted_count,
            revoked_writes = report.revoked_writes,
            in_flight = report.in_flight,
            "cache invalidated"
        );
        report
    }

    pub fn invalidate_tag(&self, tag: &str) -> InvalidationReport {
        self.invalidate(&InvalidationSelector::tag(tag))
    }

    pub fn invalidate_key(&self, key: &str) -> InvalidationReport {
        self.invalidate(&InvalidationSelector::key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use edge_cache::CacheLookup;
    use edge_core::{fetch_fn, FragmentDescriptor, Freshness, RequestId};
    use edge_observability::PipelineMetrics;

    use crate::config::FetchConfig;

    fn setup() -> (Revalidator, FetchScheduler, Arc<CacheStore>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let store = Arc::new(CacheStore::new(metrics.clone()));
        let scheduler = FetchScheduler::new(store.clone(), &FetchConfig::default(), metrics);
        let revalidator = Revalidator::new(store.clone(), scheduler.clone());
        (revalidator, scheduler, store)
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            "tag:products".parse::<InvalidationSelector>(),
            Ok(InvalidationSelector::tag("products"))
        );
        assert_eq!(
            "key:product:1:reviews".parse::<InvalidationSelector>(),
            Ok(InvalidationSelector::key("product:1:reviews"))
        );
        assert!(matches!(
            "products".parse::<InvalidationSelector>(),
            Err(SelectorParseError::Malformed(_))
        ));
        assert!(matches!(
            "path:/x".parse::<InvalidationSelector>(),
            Err(SelectorParseError::UnknownKind(k)) if k == "path"
        ));
        assert!(matches!(
            "tag:".parse::<InvalidationSelector>(),
            Err(SelectorParseError::EmptyName(_))
        ));
    }

    #[test]
    fn test_selector_display_matches_parse() {
        let selector = InvalidationSelector::key("product:1");
        assert_eq!(selector.to_string(), "key:product:1");
        assert_eq!(selector.to_string().parse::<InvalidationSelector>(), Ok(selector));
    }

    #[test]
    fn test_selector_serde() {
        let selector: InvalidationSelector = serde_json::from_str(r#"{"tag":"products"}"#).unwrap();
        assert_eq!(selector, InvalidationSelector::tag("products"));
        assert_eq!(
            serde_json::to_string(&InvalidationSelector::key("p1")).unwrap(),
            r#"{"key":"p1"}"#
        );
    }

    #[tokio::test]
    async fn test_invalidate_tag_evicts_tagged_only() {
        let (revalidator, _scheduler, store) = setup();
        store.put("p1", Bytes::from("1"), ["products"], Freshness::StaticCache);
        store.put("p2", Bytes::from("2"), ["products", "home"], Freshness::StaticCache);
        store.put("nav", Bytes::from("n"), ["home"], Freshness::StaticCache);

        let report = revalidator.invalidate_tag("products");

        assert_eq!(report.evicted_count, 2);
        assert_eq!(report.keys, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(report.in_flight, 0);
        assert!(store.get("p1").is_miss());
        assert!(store.get("p2").is_miss());
        assert!(store.get("nav").is_fresh());
        assert_eq!(store.keys_for_tag("home"), vec!["nav".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_key() {
        let (revalidator, _scheduler, store) = setup();
        store.put("p1", Bytes::from("1"), ["products"], Freshness::StaticCache);

        assert_eq!(revalidator.invalidate_key("p1").evicted_count, 1);
        assert_eq!(revalidator.invalidate_key("p1").evicted_count, 0);
        assert!(store.keys_for_tag("products").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_fetch_blocks_write() {
        let (revalidator, scheduler, store) = setup();
        let descriptor = FragmentDescriptor::builder(
            "p1",
            fetch_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Bytes::from("pre-invalidation"))
            }),
        )
        .tag("products")
        .freshness(Freshness::StaticCache)
        .build();

        let subscription = scheduler.resolve(&descriptor, &RequestId::from_string("r"));
        let report = revalidator.invalidate_tag("products");
        assert_eq!(report.evicted_count, 0);
        assert_eq!(report.revoked_writes, 1);
        assert_eq!(report.in_flight, 1);
        assert!(!scheduler.is_in_flight("p1"));

        // the waiting render still gets its data
        assert_eq!(subscription.wait().await, Ok(Bytes::from("pre-invalidation")));
        assert!(matches!(store.get("p1"), CacheLookup::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_counts_running_fetch() {
        let (revalidator, scheduler, store) = setup();
        store.put("p1", Bytes::from("old"), ["products"], Freshness::StaticCache);
        let descriptor = FragmentDescriptor::builder(
            "p1",
            fetch_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Bytes::from("new"))
            }),
        )
        .tag("products")
        .freshness(Freshness::StaticCache)
        .build();

        scheduler.refresh(&descriptor, &RequestId::from_string("r"));
        let report = revalidator.invalidate(&"tag:products".parse().unwrap());

        assert_eq!(report.evicted_count, 1);
        assert_eq!(report.in_flight, 1);
        assert_eq!(report.revoked_writes, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.get("p1").is_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_after_invalidation_fetches_again() {
        let (revalidator, scheduler, store) = setup();
        let version = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let source = version.clone();
        let counter = calls.clone();
        let descriptor = FragmentDescriptor::builder(
            "p1",
            fetch_fn(move |_ctx| {
                let seen = source.load(Ordering::SeqCst);
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Bytes::from(format!("v{seen}")))
                }
            }),
        )
        .tag("products")
        .freshness(Freshness::StaticCache)
        .build();

        let before = scheduler.resolve(&descriptor, &RequestId::from_string("r1"));
        tokio::time::sleep(Duration::from_millis(1)).await;

        version.store(1, Ordering::SeqCst);
        let report = revalidator.invalidate_tag("products");
        assert_eq!(report.in_flight, 1);

        let after = scheduler.resolve(&descriptor, &RequestId::from_string("r2"));
        let (before, after) = tokio::join!(before.wait(), after.wait());

        assert_eq!(before, Ok(Bytes::from("v0")));
        assert_eq!(after, Ok(Bytes::from("v1")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("p1"), CacheLookup::Fresh(Bytes::from("v1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_key_detaches_no_cache_fetch() {
        let (revalidator, scheduler, _store) = setup();
        let descriptor = FragmentDescriptor::builder(
            "live",
            fetch_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Bytes::from("now"))
            }),
        )
        .build();

        let waiting = scheduler.resolve(&descriptor, &RequestId::from_string("r"));
        let report = revalidator.invalidate_key("live");

        assert_eq!(report.revoked_writes, 0);
        assert_eq!(report.in_flight, 1);
        assert!(!scheduler.is_in_flight("live"));
        assert_eq!(waiting.wait().await, Ok(Bytes::from("now")));
    }
}
