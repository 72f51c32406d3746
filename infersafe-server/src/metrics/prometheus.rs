//! Prometheus metrics for the InferSafe server
//!
//! Exposes pipeline metrics in Prometheus format for monitoring.

use std::sync::{Arc, Once};
use std::time::Duration;

use infersafe_core::metrics::{MetricsRecorder, PipelineMetrics, RetryReason, ScaleDirection};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for InferSafe metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Queue Metrics ==============

    /// Requests admitted to the queue
    pub static ref REQUESTS_ENQUEUED_TOTAL: Counter = Counter::with_opts(
        Opts::new("requests_enqueued_total", "Total requests admitted to the queue")
            .namespace("infersafe")
    ).expect("metric can be created");

    /// Requests rejected because the queue was full
    pub static ref REQUESTS_REJECTED_TOTAL: Counter = Counter::with_opts(
        Opts::new("requests_rejected_total", "Total requests rejected due to queue full")
            .namespace("infersafe")
    ).expect("metric can be created");

    /// Current queue size gauge
    pub static ref QUEUE_SIZE: IntGauge = IntGauge::with_opts(
        Opts::new("queue_size", "Current number of requests in queue")
            .namespace("infersafe")
    ).expect("metric can be created");

    /// Size of dispatched batches
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size", "Number of requests per dispatched batch")
            .namespace("infersafe")
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0])
    ).expect("metric can be created");

    // ============== Dispatch Metrics ==============

    /// Failed attempts, by reason
    pub static ref RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("retries_total", "Total failed dispatch attempts")
            .namespace("infersafe"),
        &["reason"]
    ).expect("metric can be created");

    /// Backend attempt latency
    pub static ref INFERENCE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("inference_latency_seconds", "Latency of backend attempts in seconds")
            .namespace("infersafe")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    /// Resolved requests, by status
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("requests_total", "Total resolved requests")
            .namespace("infersafe"),
        &["status"]
    ).expect("metric can be created");

    // ============== Pool Metrics ==============

    /// Outstanding backend calls across the pool
    pub static ref IN_FLIGHT: IntGauge = IntGauge::with_opts(
        Opts::new("in_flight", "Outstanding backend calls across all workers")
            .namespace("infersafe")
    ).expect("metric can be created");

    /// Current worker count
    pub static ref WORKERS: IntGauge = IntGauge::with_opts(
        Opts::new("workers", "Current number of workers in the pool")
            .namespace("infersafe")
    ).expect("metric can be created");

    /// Scaling actions, by direction
    pub static ref SCALE_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("scale_events_total", "Total autoscaler actions")
            .namespace("infersafe"),
        &["direction"]
    ).expect("metric can be created");

    // ============== Backend Metrics ==============

    /// Result of the last model reload (1 = ok, 0 = failed)
    pub static ref BACKEND_HEALTHY: Gauge = Gauge::with_opts(
        Opts::new("backend_healthy", "Backend health status (1=healthy, 0=unhealthy)")
            .namespace("infersafe")
    ).expect("metric can be created");
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REQUESTS_ENQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_SIZE.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;

    REGISTRY.register(Box::new(RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INFERENCE_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(WORKERS.clone()))?;
    REGISTRY.register(Box::new(SCALE_EVENTS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(BACKEND_HEALTHY.clone()))?;

    Ok(())
}

/// Register once per process; later calls are no-ops
pub fn init_metrics() {
    REGISTER.call_once(|| {
        if let Err(e) = register_metrics() {
            tracing::warn!("Failed to register Prometheus metrics: {}", e);
        }
    });
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Set backend health status.
pub fn set_backend_healthy(healthy: bool) {
    BACKEND_HEALTHY.set(if healthy { 1.0 } else { 0.0 });
}

/// Pipeline recorder exporting to Prometheus and to in-process counters
pub struct PrometheusRecorder {
    inner: Arc<PipelineMetrics>,
}

impl PrometheusRecorder {
    pub fn new(inner: Arc<PipelineMetrics>) -> Self {
        Self { inner }
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_enqueued(&self, queue_len: usize) {
        REQUESTS_ENQUEUED_TOTAL.inc();
        QUEUE_SIZE.set(queue_len as i64);
        self.inner.record_enqueued(queue_len);
    }

    fn record_rejected(&self) {
        REQUESTS_REJECTED_TOTAL.inc();
        self.inner.record_rejected();
    }

    fn record_queue_len(&self, queue_len: usize) {
        QUEUE_SIZE.set(queue_len as i64);
        self.inner.record_queue_len(queue_len);
    }

    fn record_batch(&self, size: usize) {
        BATCH_SIZE.observe(size as f64);
        self.inner.record_batch(size);
    }

    fn record_retry(&self, reason: RetryReason) {
        RETRIES_TOTAL.with_label_values(&[reason.as_str()]).inc();
        self.inner.record_retry(reason);
    }

    fn record_latency(&self, latency: Duration) {
        INFERENCE_LATENCY_SECONDS.observe(latency.as_secs_f64());
        self.inner.record_latency(latency);
    }

    fn record_success(&self) {
        REQUESTS_TOTAL.with_label_values(&["success"]).inc();
        self.inner.record_success();
    }

    fn record_failure(&self) {
        REQUESTS_TOTAL.with_label_values(&["error"]).inc();
        self.inner.record_failure();
    }

    fn record_pool_sample(&self, in_flight: usize, workers: usize) {
        IN_FLIGHT.set(in_flight as i64);
        WORKERS.set(workers as i64);
        self.inner.record_pool_sample(in_flight, workers);
    }

    fn record_scale(&self, direction: ScaleDirection) {
        let label = match direction {
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
        };
        SCALE_EVENTS_TOTAL.with_label_values(&[label]).inc();
        self.inner.record_scale(direction);
    }
}
