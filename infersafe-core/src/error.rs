//! Error types for the InferSafe core library
//!
//! # Error Hierarchy
//!
//! ```text
//! InferenceError  - what a caller sees when its request resolves to a failure
//! ├── BackendError - a backend failed to generate or to load
//! PoolError       - worker pool construction, scale-up and reload failures
//! ConfigError     - invalid configuration values
//! ```
//!
//! Per-attempt failures (`AttemptTimeout`, `Backend`) are absorbed by the
//! dispatcher and retried. Only terminal failures resolve a request.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by an inference backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend could not produce text for a prompt
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The backend could not be constructed (model load, connection setup)
    #[error("Failed to load backend: {0}")]
    Load(String),
}

impl BackendError {
    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Create a load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }
}

/// Outcome of a single request as observed through its result handle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Admission rejected, the queue is at capacity
    #[error("Request queue is full (capacity {capacity}), try again later")]
    QueueFull { capacity: usize },

    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One dispatch attempt exceeded its deadline
    #[error("Attempt timed out after {timeout:?}")]
    AttemptTimeout { timeout: Duration },

    /// The worker or its backend failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// No worker was available to take the attempt
    #[error("No workers available")]
    NoWorkers,

    /// Terminal failure after every attempt was used
    #[error("Inference failed after all retries ({attempts} attempts)")]
    RetriesExhausted { attempts: u32 },

    /// The caller stopped waiting before the request resolved
    #[error("Request timed out after {timeout:?}")]
    CallerTimeout { timeout: Duration },

    /// The engine shut down before the request was dispatched
    #[error("Engine is shutting down")]
    Shutdown,

    /// The dispatch job for this request stopped before resolving it
    #[error("Request dispatch was aborted")]
    Aborted,
}

impl InferenceError {
    /// Stable name of the failure kind, used in caller-visible error markers
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::QueueFull { .. } => "QueueFullError",
            InferenceError::InvalidRequest(_) => "InvalidRequestError",
            InferenceError::AttemptTimeout { .. } => "AttemptTimeoutError",
            InferenceError::Backend(_) => "BackendError",
            InferenceError::NoWorkers => "NoWorkersError",
            InferenceError::RetriesExhausted { .. } => "AllRetriesExhaustedError",
            InferenceError::CallerTimeout { .. } => "CallerTimeoutError",
            InferenceError::Shutdown => "ShutdownError",
            InferenceError::Aborted => "AbortedError",
        }
    }

    /// Whether the dispatcher retries this failure locally
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::AttemptTimeout { .. }
                | InferenceError::Backend(_)
                | InferenceError::NoWorkers
        )
    }
}

/// Errors from worker pool management
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// A pool must always hold at least one worker
    #[error("Worker pool needs at least {min} worker(s), asked for {requested}")]
    TooFewWorkers { requested: usize, min: usize },

    /// Creating or reloading a worker's backend failed
    #[error("Backend for {worker} failed: {source}")]
    Backend {
        worker: String,
        #[source]
        source: BackendError,
    },
}

impl PoolError {
    pub(crate) fn backend(worker: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            worker: worker.into(),
            source,
        }
    }
}

/// Invalid configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} ({value}) must be smaller than {limit_field} ({limit})")]
    NotBelow {
        field: &'static str,
        value: String,
        limit_field: &'static str,
        limit: String,
    },
}

impl ConfigError {
    pub(crate) fn not_below(
        field: &'static str,
        value: impl ToString,
        limit_field: &'static str,
        limit: impl ToString,
    ) -> Self {
        Self::NotBelow {
            field,
            value: value.to_string(),
            limit_field,
            limit: limit.to_string(),
        }
    }
}
