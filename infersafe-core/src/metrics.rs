//! Metrics seam for the queue, dispatcher and autoscaler.
//!
//! The core only talks to [`MetricsRecorder`]; exporters (Prometheus, logs)
//! live outside. [`PipelineMetrics`] is the in-process implementation backed
//! by atomics, used for JSON stats and in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why an attempt is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    BackendError,
    NoWorkers,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::Timeout => "timeout",
            RetryReason::BackendError => "backend_error",
            RetryReason::NoWorkers => "no_workers",
        }
    }
}

/// Scaling action taken by the autoscaler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

/// Receives pipeline events; every method defaults to a no-op
pub trait MetricsRecorder: Send + Sync {
    /// A request entered the admission queue, which now holds `queue_len`
    fn record_enqueued(&self, _queue_len: usize) {}

    /// Admission rejected because the queue was full
    fn record_rejected(&self) {}

    /// The cut loop removed requests, leaving `queue_len`
    fn record_queue_len(&self, _queue_len: usize) {}

    /// A batch of `size` requests started dispatch
    fn record_batch(&self, _size: usize) {}

    /// An attempt failed and will be retried (or was the last one)
    fn record_retry(&self, _reason: RetryReason) {}

    /// Latency of one backend attempt, successful or failed
    fn record_latency(&self, _latency: Duration) {}

    /// A request resolved successfully
    fn record_success(&self) {}

    /// A request resolved to a terminal failure
    fn record_failure(&self) {}

    /// Autoscaler sample of pool load
    fn record_pool_sample(&self, _in_flight: usize, _workers: usize) {}

    /// Autoscaler changed the pool size
    fn record_scale(&self, _direction: ScaleDirection) {}
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

/// Atomic counters for the whole pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Requests admitted to the queue
    pub requests_enqueued: AtomicU64,

    /// Requests rejected because the queue was full
    pub requests_rejected: AtomicU64,

    /// Requests handed to the dispatcher
    pub requests_processed: AtomicU64,

    /// Requests resolved with generated text
    pub requests_succeeded: AtomicU64,

    /// Requests resolved to a terminal failure
    pub requests_failed: AtomicU64,

    /// Attempts that failed
    pub retries_total: AtomicU64,

    /// Attempts that failed by timing out
    pub retries_timeout: AtomicU64,

    /// Number of batches dispatched
    pub batches_processed: AtomicU64,

    /// Latency samples recorded
    pub latency_samples: AtomicU64,

    /// Sum of latency samples in milliseconds (for averaging)
    pub total_latency_ms: AtomicU64,

    /// Largest latency sample in milliseconds
    pub max_latency_ms: AtomicU64,

    /// Current queue length
    pub queue_len: AtomicU64,

    /// Maximum queue length observed
    pub max_queue_len: AtomicU64,

    /// Last sampled in-flight total
    pub in_flight: AtomicU64,

    /// Last sampled worker count
    pub workers: AtomicU64,

    /// Scale-up actions taken
    pub scale_ups: AtomicU64,

    /// Scale-down actions taken
    pub scale_downs: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average attempt latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / samples as f64
    }

    /// Average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_processed.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.requests_processed.load(Ordering::Relaxed) as f64 / batches as f64
    }

    /// Share of resolved requests that succeeded
    pub fn success_rate(&self) -> f64 {
        let ok = self.requests_succeeded.load(Ordering::Relaxed);
        let total = ok + self.requests_failed.load(Ordering::Relaxed);
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            retries_timeout: self.retries_timeout.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
            max_queue_len: self.max_queue_len.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            workers: self.workers.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
            success_rate: self.success_rate(),
        }
    }
}

fn store_max(cell: &AtomicU64, value: u64) {
    cell.fetch_max(value, Ordering::Relaxed);
}

impl MetricsRecorder for PipelineMetrics {
    fn record_enqueued(&self, queue_len: usize) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
        self.record_queue_len(queue_len);
    }

    fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_queue_len(&self, queue_len: usize) {
        self.queue_len.store(queue_len as u64, Ordering::Relaxed);
        store_max(&self.max_queue_len, queue_len as u64);
    }

    fn record_batch(&self, size: usize) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.requests_processed
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    fn record_retry(&self, reason: RetryReason) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
        if reason == RetryReason::Timeout {
            self.retries_timeout.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
        store_max(&self.max_latency_ms, ms);
    }

    fn record_success(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_pool_sample(&self, in_flight: usize, workers: usize) {
        self.in_flight.store(in_flight as u64, Ordering::Relaxed);
        self.workers.store(workers as u64, Ordering::Relaxed);
    }

    fn record_scale(&self, direction: ScaleDirection) {
        match direction {
            ScaleDirection::Up => self.scale_ups.fetch_add(1, Ordering::Relaxed),
            ScaleDirection::Down => self.scale_downs.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_enqueued: u64,
    pub requests_rejected: u64,
    pub requests_processed: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries_total: u64,
    pub retries_timeout: u64,
    pub batches_processed: u64,
    pub queue_len: u64,
    pub max_queue_len: u64,
    pub in_flight: u64,
    pub workers: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub avg_batch_size: f64,
    pub success_rate: f64,
}
