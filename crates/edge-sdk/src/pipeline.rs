//! Page orchestrator.

use std::sync::Arc;

use edge_cache::CacheStore;
use edge_core::{FragmentDescriptor, RequestId};
use edge_data::{FetchScheduler, InvalidationReport, InvalidationSelector, Revalidator};
use edge_executor::{ComposeError, Composer, Fallbacks, PageRender};
use edge_observability::{MetricsSnapshot, PipelineMetrics};
use tracing::debug;

use crate::config::{ConfigError, PipelineConfig};

/// Composition root: one cache store, one fetch scheduler and one composer
/// shared by every render in the process.
///
/// Cloning is cheap; clones share all state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<CacheStore>,
    scheduler: FetchScheduler,
    composer: Composer,
    revalidator: Revalidator,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Create a pipeline with default configuration.
    pub fn new() -> Self {
        Self::build(&PipelineConfig::default())
    }

    /// Create a pipeline from validated configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &PipelineConfig) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let store = Arc::new(CacheStore::from_config(&config.cache, metrics.clone()));
        let scheduler = FetchScheduler::new(store.clone(), &config.fetch, metrics.clone());
        let composer = Composer::new(
            store.clone(),
            scheduler.clone(),
            config.compose.clone(),
            metrics.clone(),
        );
        let revalidator = Revalidator::new(store.clone(), scheduler.clone());
        debug!(
            tiers = ?config.cache.tiers,
            ordering = %config.compose.ordering,
            default_timeout_ms = config.fetch.default_timeout_ms,
            "pipeline created"
        );

        Self {
            store,
            scheduler,
            composer,
            revalidator,
            metrics,
        }
    }

    /// Render a page.
    ///
    /// The returned `PageRender` carries the event stream and the completion
    /// signal. Must be called within a tokio runtime.
    pub fn compose_page(
        &self,
        descriptors: Vec<FragmentDescriptor>,
        fallbacks: Fallbacks,
    ) -> Result<PageRender, ComposeError> {
        self.composer.compose(descriptors, fallbacks)
    }

    /// Render a page under a caller-chosen request id.
    pub fn compose_page_with_id(
        &self,
        descriptors: Vec<FragmentDescriptor>,
        fallbacks: Fallbacks,
        request_id: RequestId,
    ) -> Result<PageRender, ComposeError> {
        self.composer.compose_with_id(descriptors, fallbacks, request_id)
    }

    /// Invalidate cached fragments, typically after a data mutation.
    pub fn invalidate(&self, selector: &InvalidationSelector) -> InvalidationReport {
        self.revalidator.invalidate(selector)
    }

    pub fn invalidate_tag(&self, tag: &str) -> InvalidationReport {
        self.revalidator.invalidate_tag(tag)
    }

    pub fn invalidate_key(&self, key: &str) -> InvalidationReport {
        self.revalidator.invalidate_key(key)
    }

    /// Point-in-time counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
