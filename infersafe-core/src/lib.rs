// InferSafe Core Library
//
// Admission queue, worker pool, retrying batch dispatcher and autoscaler
// sitting in front of a pool of inference backends.

pub mod autoscaler;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod stream;
pub mod worker;

pub use autoscaler::{Autoscaler, ScalingDecision};
pub use backend::{BackendFactory, InferenceBackend, MockBackend, MockBehavior, MockFactory};
pub use config::{AutoscalerConfig, DispatchConfig, EngineConfig, PoolConfig, QueueConfig};
pub use dispatcher::Dispatcher;
pub use engine::{Engine, StartError};
pub use error::{BackendError, ConfigError, InferenceError, PoolError};
pub use handle::{Outcome, ResultHandle};
pub use metrics::{MetricsRecorder, MetricsSnapshot, NoopRecorder, PipelineMetrics};
pub use pool::{WorkerPool, WorkerStatus};
pub use queue::{AdmissionQueue, PendingRequest};
pub use worker::Worker;
