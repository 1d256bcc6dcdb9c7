//! Fetch task scheduler with request coalescing.
//!
//! At most one fetch task exists per cache key. Concurrent resolutions of the
//! same key subscribe to the running task instead of fetching again. Tasks run
//! on the tokio runtime, so they outlive any single subscriber; a task is only
//! abandoned (and its fetch cancelled) when its last subscriber goes away.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use edge_cache::CacheStore;
use edge_core::{FetchContext, FragmentDescriptor, FragmentError, RequestId};
use edge_observability::{Counter, PipelineMetrics};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// Result delivered to every subscriber of a fetch task.
pub type FetchOutcome = Result<Bytes, FragmentError>;

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

struct FetchTask {
    id: u64,
    key: String,
    subscribers: AtomicUsize,
    result: watch::Receiver<Option<FetchOutcome>>,
    abort: AbortHandle,
}

struct Inner {
    store: Arc<CacheStore>,
    tasks: DashMap<String, Arc<FetchTask>>,
    default_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

/// Launches and tracks fragment fetches.
///
/// Cloning is cheap; clones share the task registry.
#[derive(Clone)]
pub struct FetchScheduler {
    inner: Arc<Inner>,
}

impl FetchScheduler {
    /// Create a scheduler writing through to `store`.
    pub fn new(store: Arc<CacheStore>, config: &FetchConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                tasks: DashMap::new(),
                default_timeout: config.default_timeout(),
                metrics,
            }),
        }
    }

    /// Subscribe to the fetch for `descriptor.cache_key`, starting one if none
    /// is in flight.
    ///
    /// Must be called within a tokio runtime.
    pub fn resolve(&self, descriptor: &FragmentDescriptor, request_id: &RequestId) -> Subscription {
        let task = match self.inner.tasks.entry(descriptor.cache_key.clone()) {
            Entry::Occupied(existing) => {
                let task = existing.get().clone();
                task.subscribers.fetch_add(1, Ordering::AcqRel);
                self.inner.metrics.incr(Counter::FetchCoalesced);
                debug!(
                    key = %descriptor.cache_key,
                    fragment = %descriptor.id,
                    "joined in-flight fetch"
                );
                task
            }
            Entry::Vacant(slot) => {
                let task = self.inner.spawn_task(descriptor, request_id);
                slot.insert(task.clone());
                task
            }
        };

        Subscription {
            task,
            inner: self.inner.clone(),
            finished: false,
        }
    }

    /// Refresh `descriptor` in the background.
    ///
    /// Joins an in-flight fetch if there is one. A failed refresh leaves the
    /// existing entry untouched.
    pub fn refresh(&self, descriptor: &FragmentDescriptor, request_id: &RequestId) {
        let subscription = self.resolve(descriptor, request_id);
        tokio::spawn(async move {
            let key = subscription.key().to_string();
            if let Err(err) = subscription.wait().await {
                debug!(key = %key, error = %err, "background refresh failed, keeping stale entry");
            }
        });
    }

    /// Stop new resolutions of `key` from joining the in-flight fetch.
    ///
    /// The detached fetch keeps running for the subscribers it already has,
    /// and the next `resolve` starts a new one. Returns false if no fetch was
    /// in flight.
    pub fn detach(&self, key: &str) -> bool {
        match self.inner.tasks.remove(key) {
            Some((_, task)) => {
                debug!(
                    key = %key,
                    subscribers = task.subscribers.load(Ordering::Acquire),
                    "detached in-flight fetch"
                );
                true
            }
            None => false,
        }
    }

    /// Number of fetch tasks in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Check if a fetch is in flight for `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.tasks.contains_key(key)
    }

    /// Subscribers waiting on the in-flight fetch for `key`.
    pub fn subscribers(&self, key: &str) -> usize {
        self.inner
            .tasks
            .get(key)
            .map(|task| task.subscribers.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// The cache store fetches write through to.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("in_flight", &self.in_flight())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}

impl Inner {
    /// Start a fetch task. Called with the registry slot for the key held, so
    /// the task is registered before anyone else can look for it.
    fn spawn_task(
        self: &Arc<Self>,
        descriptor: &FragmentDescriptor,
        request_id: &RequestId,
    ) -> Arc<FetchTask> {
        let id = NEXT_TASK.fetch_add(1, Ordering::Relaxed);
        let key = descriptor.cache_key.clone();
        let timeout = descriptor.timeout.unwrap_or(self.default_timeout);
        let freshness = descriptor.freshness;
        let fetcher = descriptor.fetcher.clone();

        // Reserve before fetching so an invalidation that lands mid-fetch
        // revokes this write.
        let ticket = freshness
            .is_cacheable()
            .then(|| self.store.reserve(&key, descriptor.tags.iter().cloned()));

        let ctx = FetchContext {
            fragment_id: descriptor.id.clone(),
            cache_key: key.clone(),
            request_id: request_id.clone(),
            timeout,
        };

        let (tx, rx) = watch::channel(None);
        let inner = self.clone();
        let task_key = key.clone();

        self.metrics.incr(Counter::FetchStarted);
        debug!(
            key = %key,
            fragment = %descriptor.id,
            request_id = %request_id,
            timeout_ms = timeout.as_millis() as u64,
            "fetch started"
        );

        let handle = tokio::spawn(async move {
            let registration = Registration {
                inner: inner.clone(),
                key: task_key.clone(),
                id,
            };
            let started = Instant::now();

            let outcome = match tokio::time::timeout(timeout, fetcher.fetch(ctx)).await {
                Ok(Ok(data)) => Ok(data),
                Ok(Err(err)) => Err(FragmentError::fetch(&err)),
                Err(_) => Err(FragmentError::Timeout(timeout)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(data) => {
                    let written = match ticket {
                        Some(ticket) => inner.store.commit(ticket, data.clone(), freshness),
                        None => false,
                    };
                    debug!(key = %task_key, bytes = data.len(), written, elapsed_ms, "fetch completed");
                }
                Err(err) => {
                    let counter = if err.is_timeout() {
                        Counter::FetchTimeout
                    } else {
                        Counter::FetchFailed
                    };
                    inner.metrics.incr(counter);
                    warn!(key = %task_key, error = %err, elapsed_ms, "fetch failed");
                }
            }

            // Unregister before notifying: anyone resolving after this point
            // starts a new task and finds the written entry in the cache.
            drop(registration);
            let _ = tx.send(Some(outcome));
        });

        Arc::new(FetchTask {
            id,
            key,
            subscribers: AtomicUsize::new(1),
            result: rx,
            abort: handle.abort_handle(),
        })
    }
}

/// Removes a task from the registry when its future ends, however it ends.
struct Registration {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        self.inner.tasks.remove_if(&self.key, |_, task| task.id == id);
    }
}

/// A caller's claim on a fetch task.
///
/// Dropping an unfinished subscription releases the claim; the last release
/// cancels the fetch.
pub struct Subscription {
    task: Arc<FetchTask>,
    inner: Arc<Inner>,
    finished: bool,
}

impl Subscription {
    /// Cache key being fetched.
    pub fn key(&self) -> &str {
        &self.task.key
    }

    /// Wait for the fetch result.
    pub async fn wait(mut self) -> FetchOutcome {
        let mut result = self.task.result.clone();
        let outcome = match result.wait_for(|r| r.is_some()).await {
            Ok(ready) => ready.clone().unwrap_or(Err(FragmentError::Abandoned)),
            Err(_) => Err(FragmentError::Abandoned),
        };
        self.finished = true;
        outcome
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let task = &self.task;
        let mut registered = false;
        let removed = self.inner.tasks.remove_if(&task.key, |_, current| {
            registered = current.id == task.id;
            registered && task.subscribers.fetch_sub(1, Ordering::AcqRel) == 1
        });
        // Tasks out of the registry gain no subscribers, so the count only
        // falls and needs no lock.
        let last = removed.is_some()
            || (!registered && task.subscribers.fetch_sub(1, Ordering::AcqRel) == 1);
        if last && task.result.borrow().is_none() {
            task.abort.abort();
            self.inner.metrics.incr(Counter::FetchAbandoned);
            debug!(key = %task.key, "fetch abandoned, no subscribers left");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.task.key)
            .field("task", &self.task.id)
            .finish()
    }
}
