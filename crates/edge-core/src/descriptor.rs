//! Fragment descriptors: independently fetched, independently cached units of a page.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::{pass_through, Fetcher, Renderer};

/// Freshness policy of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Freshness {
    /// Never cached; every render fetches.
    #[default]
    NoCache,
    /// Cached until `ttl` elapses, then stale.
    TimedCache {
        /// Time-to-live after the entry is written.
        ttl: Duration,
    },
    /// Cached until explicitly invalidated.
    StaticCache,
}

impl Freshness {
    /// Timed policy with the given TTL.
    pub fn timed(ttl: Duration) -> Self {
        Self::TimedCache { ttl }
    }

    /// Check if entries are ever written for this policy.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::NoCache)
    }

    /// TTL of the policy, if it expires.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::TimedCache { ttl } => Some(*ttl),
            _ => None,
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCache => write!(f, "no-cache"),
            Self::TimedCache { ttl } => write!(f, "timed({}ms)", ttl.as_millis()),
            Self::StaticCache => write!(f, "static"),
        }
    }
}

/// A unit of content to render.
///
/// `id` must be unique within one composition request. `tags` may overlap
/// across fragments; they drive group invalidation.
#[derive(Clone)]
pub struct FragmentDescriptor {
    /// Fragment identifier, unique per page.
    pub id: String,
    /// Key under which fetched data is cached and coalesced.
    pub cache_key: String,
    /// Invalidation tags.
    pub tags: BTreeSet<String>,
    /// Freshness policy.
    pub freshness: Freshness,
    /// Emission priority among simultaneously ready fragments (lower first).
    pub priority: i32,
    /// Fetch deadline overriding the scheduler default.
    pub timeout: Option<Duration>,
    /// Data source.
    pub fetcher: Arc<dyn Fetcher>,
    /// Markup for fetched data.
    pub renderer: Arc<dyn Renderer>,
}

impl FragmentDescriptor {
    /// Start building a descriptor.
    pub fn builder(id: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> FragmentBuilder {
        FragmentBuilder::new(id, fetcher)
    }

    /// Check if the descriptor carries a tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl fmt::Debug for FragmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentDescriptor")
            .field("id", &self.id)
            .field("cache_key", &self.cache_key)
            .field("tags", &self.tags)
            .field("freshness", &self.freshness)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for ergonomic fragment definition.
pub struct FragmentBuilder {
    id: String,
    cache_key: Option<String>,
    tags: BTreeSet<String>,
    freshness: Freshness,
    priority: i32,
    timeout: Option<Duration>,
    fetcher: Arc<dyn Fetcher>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl FragmentBuilder {
    /// Create a new fragment builder.
    pub fn new(id: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            id: id.into(),
            cache_key: None,
            tags: BTreeSet::new(),
            freshness: Freshness::default(),
            priority: 0,
            timeout: None,
            fetcher,
            renderer: None,
        }
    }

    /// Set the cache key (defaults to the fragment id).
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Add an invalidation tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add multiple invalidation tags.
    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tags.iter().map(|s| s.to_string()));
        self
    }

    /// Set the freshness policy.
    pub fn freshness(mut self, freshness: Freshness) -> Self {
        self.freshness = freshness;
        self
    }

    /// Shorthand for `Freshness::TimedCache`.
    pub fn ttl(self, ttl: Duration) -> Self {
        self.freshness(Freshness::timed(ttl))
    }

    /// Set the emission priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the fetch deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the renderer.
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Build the descriptor.
    pub fn build(self) -> FragmentDescriptor {
        let cache_key = self.cache_key.unwrap_or_else(|| self.id.clone());
        FragmentDescriptor {
            id: self.id,
            cache_key,
            tags: self.tags,
            freshness: self.freshness,
            priority: self.priority,
            timeout: self.timeout,
            fetcher: self.fetcher,
            renderer: self.renderer.unwrap_or_else(pass_through),
        }
    }
}

/// Build a namespaced cache key.
///
/// ```ignore
/// let key = cache_key!("product", product_id, "reviews");
/// // "product:42:reviews"
/// ```
#[macro_export]
macro_rules! cache_key {
    ($prefix:expr, $($part:expr),+) => {{
        let mut key = String::from($prefix);
        $(
            key.push(':');
            key.push_str(&$part.to_string());
        )+
        key
    }};
}
