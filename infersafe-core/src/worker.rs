//! A worker: one backend instance behind a concurrency guard.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use crate::backend::InferenceBackend;
use crate::error::{BackendError, InferenceError};

/// Concurrency-bounded wrapper around one inference backend
pub struct Worker {
    name: String,
    backend: RwLock<Arc<dyn InferenceBackend>>,
    slots: Semaphore,
    concurrency_limit: usize,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when the call ends, however it ends
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    /// Create a worker owning `backend` with `concurrency_limit` slots
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
        concurrency_limit: usize,
    ) -> Self {
        let concurrency_limit = concurrency_limit.max(1);
        Self {
            name: name.into(),
            backend: RwLock::new(backend),
            slots: Semaphore::new(concurrency_limit),
            concurrency_limit,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Run one generation on this worker's backend
    ///
    /// Waits for a free slot first. The in-flight count covers the backend
    /// call only and is released on success, failure or cancellation.
    pub async fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| BackendError::generation(format!("{} is closed", self.name)))?;

        let _guard = InFlightGuard::enter(&self.in_flight);
        let backend = self.backend.read().await.clone();

        debug!(
            worker = %self.name,
            in_flight = self.in_flight_count(),
            prompt = %preview(prompt),
            "Processing prompt"
        );

        let text = backend.generate(prompt, max_tokens).await?;
        debug!(worker = %self.name, "Completed prompt");
        Ok(text)
    }

    /// Current outstanding backend calls on this worker
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Swap in a freshly built backend
    ///
    /// Calls already running keep the previous instance until they return.
    pub async fn replace_backend(&self, backend: Arc<dyn InferenceBackend>) {
        let description = backend.describe();
        *self.backend.write().await = backend;
        info!(worker = %self.name, backend = %description, "Backend replaced");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// First 30 characters of a prompt, for logs
pub(crate) fn preview(prompt: &str) -> &str {
    match prompt.char_indices().nth(30) {
        Some((idx, _)) => &prompt[..idx],
        None => prompt,
    }
}
