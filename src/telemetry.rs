//! In-process metrics and request correlation.
//!
//! Counters are lock-free atomics read through [`ServerMetrics::snapshot`];
//! the snapshot is reported by `clear_cache` and logged.

use crate::constants::PERCENTAGE_MULTIPLIER;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a short correlation ID (8 characters) for compact logging.
pub fn generate_short_correlation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Correlation information for one tool call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub start_time: Instant,
    pub operation: String,
}

impl RequestContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            correlation_id: generate_short_correlation_id(),
            start_time: Instant::now(),
            operation: operation.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

/// Server metrics collection.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Tool invocations, successful or not.
    pub tool_calls: AtomicU64,

    /// Tool invocations that returned an error envelope.
    pub tool_errors: AtomicU64,

    /// Item and list reads served from cache.
    pub cache_hits: AtomicU64,

    /// Reads that went to Metabase.
    pub live_fetches: AtomicU64,

    /// Non-2xx or transport failures from Metabase.
    pub upstream_errors: AtomicU64,

    /// Individual ids that failed inside an otherwise successful batch.
    pub batch_item_errors: AtomicU64,

    /// Native and card queries submitted.
    pub queries_executed: AtomicU64,

    /// Statements rejected by read-only mode.
    pub writes_blocked: AtomicU64,

    /// `clear_cache` invocations.
    pub cache_clears: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tool_call(&self, success: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hits(&self, n: u64) {
        self.cache_hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_live_fetches(&self, n: u64) {
        self.live_fetches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_item_errors(&self, n: u64) {
        self.batch_item_errors.fetch_add(n, Ordering::Relaxed);
        self.upstream_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_blocked(&self) {
        self.writes_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_clear(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            live_fetches: self.live_fetches.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            batch_item_errors: self.batch_item_errors.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            writes_blocked: self.writes_blocked.load(Ordering::Relaxed),
            cache_clears: self.cache_clears.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub cache_hits: u64,
    pub live_fetches: u64,
    pub upstream_errors: u64,
    pub batch_item_errors: u64,
    pub queries_executed: u64,
    pub writes_blocked: u64,
    pub cache_clears: u64,
}

impl MetricsSnapshot {
    /// Percentage of reads served from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.live_fetches;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * PERCENTAGE_MULTIPLIER
        }
    }

    /// Percentage of tool calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.tool_calls == 0 {
            100.0
        } else {
            ((self.tool_calls - self.tool_errors) as f64 / self.tool_calls as f64)
                * PERCENTAGE_MULTIPLIER
        }
    }
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<ServerMetrics>;

pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(ServerMetrics::new())
}
