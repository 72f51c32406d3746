//! Metrics module for the InferSafe server
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use self::prometheus::{encode_metrics, init_metrics, set_backend_healthy, PrometheusRecorder};
