//! Page composition: concurrent fragment resolution with ordered output.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use edge_cache::{CacheLookup, CacheStatus, CacheStore};
use edge_core::{FragmentDescriptor, FragmentError, RequestId, TimingContext};
use edge_data::FetchScheduler;
use edge_observability::{Counter, PipelineMetrics, RenderReport};
use edge_streaming::{
    completion_channel, CompletionHandle, CompletionSender, ComposeError, CompositionEvent,
    CompositionResult, CompositionStream, CompositionSummary, SlotOutput, SlotStatus,
};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ComposeConfig;
use crate::fallback::Fallbacks;
use crate::scheduler::{Emission, SlotTracker};

/// A started page render.
#[derive(Debug)]
pub struct PageRender {
    pub request_id: RequestId,
    /// Output events. Dropping this cancels the render.
    pub events: CompositionStream,
    /// Resolves once the completion marker has been emitted.
    pub completion: CompletionHandle,
}

impl PageRender {
    /// Drain the render into a `CompositionResult`.
    pub async fn collect(self) -> Result<CompositionResult, ComposeError> {
        self.events.collect().await
    }
}

/// Composes pages from fragment descriptors.
#[derive(Debug, Clone)]
pub struct Composer {
    store: Arc<CacheStore>,
    scheduler: FetchScheduler,
    config: ComposeConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Composer {
    pub fn new(
        store: Arc<CacheStore>,
        scheduler: FetchScheduler,
        config: ComposeConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
            metrics,
        }
    }

    /// Start composing a page.
    ///
    /// Every fragment starts resolving immediately; the returned stream yields
    /// events as slots become emittable. Must be called within a tokio runtime.
    pub fn compose(
        &self,
        descriptors: Vec<FragmentDescriptor>,
        fallbacks: Fallbacks,
    ) -> Result<PageRender, ComposeError> {
        self.compose_with_id(descriptors, fallbacks, RequestId::generate())
    }

    /// Start composing a page under a caller-chosen request id.
    pub fn compose_with_id(
        &self,
        descriptors: Vec<FragmentDescriptor>,
        fallbacks: Fallbacks,
        request_id: RequestId,
    ) -> Result<PageRender, ComposeError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(ComposeError::DuplicateFragment(descriptor.id.clone()));
            }
        }

        let slot_count = descriptors.len();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (done, completion) = completion_channel();

        let driver = Driver {
            tracker: SlotTracker::new(
                self.config.ordering,
                descriptors.iter().map(|d| d.priority).collect(),
            ),
            descriptors,
            fallbacks,
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            metrics: self.metrics.clone(),
            request_id: request_id.clone(),
            timing: TimingContext::new(),
            tx,
            labels: vec![String::new(); slot_count],
            failed: 0,
            stale: 0,
        };
        tokio::spawn(driver.run(done));

        Ok(PageRender {
            request_id,
            events: CompositionStream::new(rx, slot_count),
            completion,
        })
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }
}

/// Receiver went away.
struct Disconnected;

type Resolution = BoxFuture<'static, (usize, CacheStatus, Result<Bytes, FragmentError>)>;

/// One render in progress. Owned by its spawned task.
struct Driver {
    descriptors: Vec<FragmentDescriptor>,
    fallbacks: Fallbacks,
    store: Arc<CacheStore>,
    scheduler: FetchScheduler,
    metrics: Arc<PipelineMetrics>,
    request_id: RequestId,
    timing: TimingContext,
    tracker: SlotTracker,
    tx: mpsc::Sender<CompositionEvent>,
    /// Content source per slot, for the render report.
    labels: Vec<String>,
    failed: usize,
    stale: usize,
}

impl Driver {
    async fn run(mut self, done: CompletionSender) {
        self.metrics.incr(Counter::RenderStarted);
        info!(
            request_id = %self.request_id,
            fragments = self.descriptors.len(),
            "render started"
        );

        match self.drive().await {
            Ok(summary) => {
                self.metrics.incr(Counter::RenderCompleted);
                info!(
                    request_id = %self.request_id,
                    fragments = summary.fragments,
                    failed = summary.failed,
                    stale = summary.stale,
                    duration_us = summary.report.total_duration_us,
                    "render complete"
                );
                let _ = done.send(summary);
            }
            Err(Disconnected) => {
                self.metrics.incr(Counter::RenderCancelled);
                info!(
                    request_id = %self.request_id,
                    pending = self.tracker.pending().len(),
                    "render cancelled, consumer disconnected"
                );
            }
        }
    }

    async fn drive(&mut self) -> Result<CompositionSummary, Disconnected> {
        // Start every fragment before awaiting any of them.
        let mut pending: FuturesUnordered<Resolution> = FuturesUnordered::new();
        for index in 0..self.descriptors.len() {
            let descriptor = &self.descriptors[index];
            let lookup = if descriptor.freshness.is_cacheable() {
                self.store.get(&descriptor.cache_key)
            } else {
                CacheLookup::Miss
            };

            match lookup {
                CacheLookup::Fresh(data) => {
                    self.settle(index, CacheStatus::Hit, Ok(data));
                }
                CacheLookup::Stale(data) => {
                    self.scheduler.refresh(descriptor, &self.request_id);
                    self.stale += 1;
                    self.settle(index, CacheStatus::Stale, Ok(data));
                }
                CacheLookup::Miss => {
                    let status = if descriptor.freshness.is_cacheable() {
                        CacheStatus::Miss
                    } else {
                        CacheStatus::Bypass
                    };
                    let subscription = self.scheduler.resolve(descriptor, &self.request_id);
                    pending.push(
                        async move { (index, status, subscription.wait().await) }.boxed(),
                    );
                }
            }
        }
        self.flush().await?;

        while !pending.is_empty() {
            let next = tokio::select! {
                biased;
                _ = self.tx.closed() => return Err(Disconnected),
                next = pending.next() => next,
            };
            let Some((index, status, outcome)) = next else {
                break;
            };
            self.settle(index, status, outcome);

            // Anything else that finished meanwhile is emitted in the same batch.
            while let Some(Some((index, status, outcome))) = pending.next().now_or_never() {
                self.settle(index, status, outcome);
            }
            self.flush().await?;
        }

        let summary = self.summary();
        self.send(CompositionEvent::Complete(summary.clone())).await?;
        Ok(summary)
    }

    /// Render a resolved slot and hand it to the tracker.
    fn settle(&mut self, index: usize, status: CacheStatus, outcome: Result<Bytes, FragmentError>) {
        let descriptor = &self.descriptors[index];
        self.timing.mark_slot_ready(&descriptor.id);

        let rendered = outcome.and_then(|data| {
            descriptor
                .renderer
                .render(&data)
                .map_err(|err| FragmentError::render(&err))
        });

        let slot = match rendered {
            Ok(output) => SlotOutput {
                index,
                id: descriptor.id.clone(),
                output,
                status: SlotStatus::Rendered(status),
            },
            Err(err) => {
                warn!(
                    request_id = %self.request_id,
                    fragment = %descriptor.id,
                    kind = err.kind(),
                    error = %err,
                    "fragment failed, rendering error output"
                );
                self.metrics.incr(Counter::SlotFailed);
                self.failed += 1;
                SlotOutput {
                    index,
                    id: descriptor.id.clone(),
                    output: self.fallbacks.render_error(descriptor, &err),
                    status: SlotStatus::Failed(err),
                }
            }
        };
        debug!(
            request_id = %self.request_id,
            fragment = %slot.id,
            index,
            status = %slot.status.label(),
            "slot ready"
        );
        self.labels[index] = slot.status.label();
        self.tracker.ready(slot);
    }

    /// Emit everything the tracker releases.
    async fn flush(&mut self) -> Result<(), Disconnected> {
        for emission in self.tracker.drain() {
            let event = match emission {
                Emission::Placeholder(index) => {
                    let descriptor = &self.descriptors[index];
                    CompositionEvent::Placeholder(SlotOutput {
                        index,
                        id: descriptor.id.clone(),
                        output: self.fallbacks.render_placeholder(descriptor),
                        status: SlotStatus::Pending,
                    })
                }
                Emission::Fragment(slot) => {
                    self.timing.mark_slot_sent(&slot.id);
                    CompositionEvent::Fragment(slot)
                }
            };
            self.send(event).await?;
        }
        Ok(())
    }

    async fn send(&self, event: CompositionEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    fn summary(&self) -> CompositionSummary {
        let sources: Vec<(String, String)> = self
            .descriptors
            .iter()
            .zip(&self.labels)
            .map(|(d, label)| (d.id.clone(), label.clone()))
            .collect();
        CompositionSummary {
            request_id: self.request_id.clone(),
            fragments: self.descriptors.len(),
            failed: self.failed,
            stale: self.stale,
            report: RenderReport::from_timing(&self.request_id, &self.timing, &sources),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use edge_core::{fetch_fn, Fetcher, Freshness};
    use edge_data::FetchConfig;

    use crate::ordering::OrderingStrategy;

    fn setup(ordering: OrderingStrategy) -> (Composer, Arc<CacheStore>, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let store = Arc::new(CacheStore::new(metrics.clone()));
        let scheduler = FetchScheduler::new(store.clone(), &FetchConfig::default(), metrics.clone());
        let config = ComposeConfig::default().with_ordering(ordering);
        (
            Composer::new(store.clone(), scheduler, config, metrics.clone()),
            store,
            metrics,
        )
    }

    fn delayed(body: &'static str, delay_ms: u64) -> Arc<dyn Fetcher> {
        fetch_fn(move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Bytes::from(body))
        })
    }

    fn counted(calls: Arc<AtomicUsize>, body: &'static str, delay_ms: u64) -> Arc<dyn Fetcher> {
        fetch_fn(move |_ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Bytes::from(body))
            }
        })
    }

    fn a_and_b() -> Vec<FragmentDescriptor> {
        vec![
            FragmentDescriptor::builder("a", delayed("A", 100)).priority(1).build(),
            FragmentDescriptor::builder("b", delayed("B", 10)).priority(0).build(),
        ]
    }

    fn trace(events: &[CompositionEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                CompositionEvent::Placeholder(s) => format!("hold:{}", s.id),
                CompositionEvent::Fragment(s) => format!("{}@{}", s.id, s.index),
                CompositionEvent::Complete(_) => "done".to_string(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_keeps_index_order() {
        let (composer, _store, _metrics) = setup(OrderingStrategy::Strict);

        let result = composer
            .compose(a_and_b(), Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(trace(&result.events), vec!["hold:a", "a@0", "b@1", "done"]);
        assert_eq!(result.document(), Bytes::from("AB"));
        assert_eq!(result.summary.fragments, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_emits_on_completion() {
        let (composer, _store, _metrics) = setup(OrderingStrategy::OutOfOrder);

        let result = composer
            .compose(a_and_b(), Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(
            trace(&result.events),
            vec!["hold:a", "hold:b", "b@1", "a@0", "done"]
        );
        // position is still decided by index
        assert_eq!(result.document(), Bytes::from("AB"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_fragments_emit_by_priority() {
        let (composer, store, _metrics) = setup(OrderingStrategy::OutOfOrder);
        store.put("low", Bytes::from("L"), ["t"], Freshness::StaticCache);
        store.put("high", Bytes::from("H"), ["t"], Freshness::StaticCache);

        let descriptors = vec![
            FragmentDescriptor::builder("low", delayed("x", 0))
                .freshness(Freshness::StaticCache)
                .priority(10)
                .build(),
            FragmentDescriptor::builder("high", delayed("x", 0))
                .freshness(Freshness::StaticCache)
                .priority(-1)
                .build(),
        ];
        let result = composer
            .compose(descriptors, Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(trace(&result.events), vec!["high@1", "low@0", "done"]);
        assert_eq!(result.document(), Bytes::from("LH"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fragment_gets_error_output() {
        let (composer, _store, metrics) = setup(OrderingStrategy::Strict);
        let descriptors = vec![
            FragmentDescriptor::builder(
                "x",
                fetch_fn(|_ctx| async { Err::<Bytes, _>(anyhow::anyhow!("boom")) }),
            )
            .build(),
            FragmentDescriptor::builder("y", delayed("Y", 5)).build(),
        ];
        let fallbacks = Fallbacks::new(
            |_| Bytes::from("..."),
            |d, err| Bytes::from(format!("[{} failed: {}]", d.id, err)),
        );

        let render = composer.compose(descriptors, fallbacks).unwrap();
        let PageRender { events, completion, .. } = render;
        let result = events.collect().await.unwrap();

        let x = result.slot("x").unwrap();
        assert_eq!(x.text(), "[x failed: fetch failed: boom]");
        assert_eq!(
            x.status,
            SlotStatus::Failed(FragmentError::FetchFailure("boom".to_string()))
        );
        assert_eq!(result.slot("y").unwrap().text(), "Y");
        assert!(result.events.last().unwrap().is_complete());

        let summary = completion.await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.report.slots[0].source, "ERROR");
        assert_eq!(metrics.snapshot().render.failed_slots, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_is_contained() {
        let (composer, _store, _metrics) = setup(OrderingStrategy::Strict);
        let descriptors = vec![FragmentDescriptor::builder("r", delayed("data", 0))
            .renderer(Arc::new(|_: &Bytes| -> anyhow::Result<Bytes> {
                Err(anyhow::anyhow!("bad template"))
            }))
            .build()];

        let result = composer
            .compose(descriptors, Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        let slot = result.slot("r").unwrap();
        assert!(matches!(
            slot.error(),
            Some(FragmentError::RenderFailure(msg)) if msg == "bad template"
        ));
        assert!(slot.text().contains("fragment-error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_fetch() {
        let (composer, store, _metrics) = setup(OrderingStrategy::Strict);
        let calls = Arc::new(AtomicUsize::new(0));
        store.put("hero", Bytes::from("cached"), ["home"], Freshness::StaticCache);

        let descriptors = vec![FragmentDescriptor::builder("hero", counted(calls.clone(), "new", 0))
            .freshness(Freshness::StaticCache)
            .build()];
        let result = composer
            .compose(descriptors, Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(trace(&result.events), vec!["hero@0", "done"]);
        assert_eq!(
            result.slot("hero").unwrap().status,
            SlotStatus::Rendered(CacheStatus::Hit)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_hit_serves_old_value_and_refreshes() {
        let (composer, store, _metrics) = setup(OrderingStrategy::Strict);
        let ttl = Duration::from_millis(50);
        store.put("feed", Bytes::from("old"), ["feed"], Freshness::timed(ttl));
        tokio::time::advance(Duration::from_millis(60)).await;

        let descriptors = vec![FragmentDescriptor::builder("feed", delayed("new", 20))
            .ttl(ttl)
            .tag("feed")
            .build()];
        let result = composer
            .compose(descriptors, Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        let slot = result.slot("feed").unwrap();
        assert_eq!(slot.text(), "old");
        assert_eq!(slot.status, SlotStatus::Rendered(CacheStatus::Stale));
        assert_eq!(result.summary.stale, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("feed"), CacheLookup::Fresh(Bytes::from("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cache_is_bypass() {
        let (composer, store, _metrics) = setup(OrderingStrategy::Strict);
        let descriptors = vec![FragmentDescriptor::builder("live", delayed("now", 0)).build()];

        let result = composer
            .compose(descriptors, Fallbacks::html())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(
            result.slot("live").unwrap().status,
            SlotStatus::Rendered(CacheStatus::Bypass)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let (composer, _store, _metrics) = setup(OrderingStrategy::Strict);
        let descriptors = vec![
            FragmentDescriptor::builder("a", delayed("1", 0)).build(),
            FragmentDescriptor::builder("a", delayed("2", 0)).build(),
        ];

        let err = composer.compose(descriptors, Fallbacks::html()).unwrap_err();
        assert_eq!(err, ComposeError::DuplicateFragment("a".to_string()));
    }

    #[tokio::test]
    async fn test_empty_page_completes() {
        let (composer, _store, _metrics) = setup(OrderingStrategy::Strict);
        let render = composer.compose(Vec::new(), Fallbacks::html()).unwrap();
        let request_id = render.request_id.clone();

        let result = render.collect().await.unwrap();
        assert_eq!(trace(&result.events), vec!["done"]);
        assert_eq!(result.summary.request_id, request_id);
        assert!(result.document().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_cancels_sole_fetch() {
        let (composer, _store, metrics) = setup(OrderingStrategy::Strict);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let descriptors = vec![FragmentDescriptor::builder(
            "slow",
            fetch_fn(move |_ctx| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(Bytes::from("late"))
                }
            }),
        )
        .build()];

        let PageRender { mut events, completion, .. } =
            composer.compose(descriptors, Fallbacks::html()).unwrap();
        assert!(events.next().await.unwrap().is_placeholder());
        drop(events);

        assert_eq!(completion.await, Err(ComposeError::Cancelled));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.render.cancelled, 1);
        assert_eq!(snapshot.fetch.abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_render_leaves_shared_fetch_running() {
        let (composer, _store, metrics) = setup(OrderingStrategy::Strict);
        let calls = Arc::new(AtomicUsize::new(0));
        let page = || {
            vec![FragmentDescriptor::builder("shared", counted(calls.clone(), "S", 50))
                .freshness(Freshness::StaticCache)
                .build()]
        };

        let mut first = composer.compose(page(), Fallbacks::html()).unwrap();
        let mut second = composer.compose(page(), Fallbacks::html()).unwrap();
        assert!(first.events.next().await.unwrap().is_placeholder());
        assert!(second.events.next().await.unwrap().is_placeholder());

        drop(first);
        let result = second.events.collect().await.unwrap();

        assert_eq!(result.slot("shared").unwrap().text(), "S");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().fetch.abandoned, 0);
    }
}
