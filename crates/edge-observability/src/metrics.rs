//! Pipeline counters and per-render timing reports.

use std::sync::atomic::{AtomicU64, Ordering};

use edge_core::{RequestId, TimingContext};
use serde::{Deserialize, Serialize};

/// Counters tracked across the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    CacheHit,
    CacheStaleHit,
    CacheMiss,
    CachePut,
    CacheEviction,
    RevokedWrite,
    FetchStarted,
    FetchCoalesced,
    FetchFailed,
    FetchTimeout,
    FetchAbandoned,
    RenderStarted,
    RenderCompleted,
    RenderCancelled,
    SlotFailed,
}

const COUNTERS: usize = 15;

impl Counter {
    fn slot(self) -> usize {
        self as usize
    }
}

/// Process-wide pipeline counters.
///
/// One instance is shared by the cache store, the fetch scheduler and the
/// composition engine.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    counters: [AtomicU64; COUNTERS],
}

impl PipelineMetrics {
    /// Create a zeroed metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Increment a counter by `n`.
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.slot()].fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.slot()].load(Ordering::Relaxed)
    }

    /// Capture all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache: CacheCounters {
                hits: self.get(Counter::CacheHit),
                stale_hits: self.get(Counter::CacheStaleHit),
                misses: self.get(Counter::CacheMiss),
                puts: self.get(Counter::CachePut),
                evictions: self.get(Counter::CacheEviction),
                revoked_writes: self.get(Counter::RevokedWrite),
            },
            fetch: FetchCounters {
                started: self.get(Counter::FetchStarted),
                coalesced: self.get(Counter::FetchCoalesced),
                failed: self.get(Counter::FetchFailed),
                timeouts: self.get(Counter::FetchTimeout),
                abandoned: self.get(Counter::FetchAbandoned),
            },
            render: RenderCounters {
                started: self.get(Counter::RenderStarted),
                completed: self.get(Counter::RenderCompleted),
                cancelled: self.get(Counter::RenderCancelled),
                failed_slots: self.get(Counter::SlotFailed),
            },
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache: CacheCounters,
    pub fetch: FetchCounters,
    pub render: RenderCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub revoked_writes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCounters {
    pub started: u64,
    pub coalesced: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub abandoned: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderCounters {
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed_slots: u64,
}

/// Timing for one slot of a render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetrics {
    /// Fragment id.
    pub name: String,
    /// Time from render start until data was ready (microseconds).
    pub ready_us: u64,
    /// Time from render start until content was emitted (microseconds).
    pub sent_us: u64,
    /// Time ready content waited behind earlier slots (microseconds).
    pub held_us: u64,
    /// Where the content came from (`HIT`, `STALE`, `MISS`, `BYPASS`) or `ERROR`.
    pub source: String,
}

/// Timing report for one page render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderReport {
    /// Request ID for correlation.
    pub request_id: String,
    /// Time to first emitted slot (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_slot_us: Option<u64>,
    /// Time until the completion marker (microseconds).
    pub total_duration_us: u64,
    /// Per-slot timings in index order.
    pub slots: Vec<SlotMetrics>,
}

impl RenderReport {
    /// Build a report from a render's timing marks.
    ///
    /// `slots` lists `(fragment id, source label)` in index order; slots
    /// without both marks are left out.
    pub fn from_timing(
        request_id: &RequestId,
        timing: &TimingContext,
        slots: &[(String, String)],
    ) -> Self {
        let slots = slots
            .iter()
            .filter_map(|(name, source)| {
                let t = timing.slot_timing(name)?;
                Some(SlotMetrics {
                    name: name.clone(),
                    ready_us: t.ready.as_micros() as u64,
                    sent_us: t.sent.as_micros() as u64,
                    held_us: t.held.as_micros() as u64,
                    source: source.clone(),
                })
            })
            .collect();

        Self {
            request_id: request_id.to_string(),
            time_to_first_slot_us: timing.time_to_first_slot().map(|d| d.as_micros() as u64),
            total_duration_us: timing.elapsed().as_micros() as u64,
            slots,
        }
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
