//! The inference backend capability and a deterministic mock implementation.
//!
//! A backend turns a prompt and a token budget into text. Its latency is
//! unbounded and it may fail; the worker pool only sees it through
//! [`InferenceBackend`], and creates fresh instances through a
//! [`BackendFactory`] on scale-up and reload.
//!
//! Dropping a `generate` future cancels the call at its next await point.
//! Backends that hand work to a blocking thread keep running after the
//! dispatcher stops waiting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;

/// Something that produces generated text from a prompt
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Generate up to `max_tokens` tokens for `prompt`
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError>;

    /// Short description for logs
    fn describe(&self) -> String {
        "backend".to_string()
    }
}

/// Builds backend instances for new and reloaded workers
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Construct a fresh backend instance
    async fn create(&self) -> Result<Arc<dyn InferenceBackend>, BackendError>;

    /// Short description of what gets loaded (model path, URL, ...)
    fn describe(&self) -> String;
}

/// What a [`MockBackend`] does when called
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Always return this text
    Respond(String),
    /// Return the first `max_tokens` words of the prompt
    Echo,
    /// Always fail with this message
    Fail(String),
    /// Never complete
    Hang,
}

/// In-process backend with scripted behavior
///
/// Used for the offline `mock` serving mode and throughout the tests.
#[derive(Debug)]
pub struct MockBackend {
    behavior: MockBehavior,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend that always answers with `text`
    pub fn responding(text: impl Into<String>) -> Self {
        Self::new(MockBehavior::Respond(text.into()))
    }

    /// Add a fixed latency before every answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Share a call counter with other instances
    pub fn with_call_counter(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    /// Number of `generate` calls that started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &self.behavior {
            MockBehavior::Respond(text) => Ok(text.clone()),
            MockBehavior::Echo => Ok(prompt
                .split_whitespace()
                .take(max_tokens as usize)
                .collect::<Vec<_>>()
                .join(" ")),
            MockBehavior::Fail(msg) => Err(BackendError::generation(msg.clone())),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        format!("mock({:?})", self.behavior)
    }
}

/// Factory producing [`MockBackend`]s that share one call counter
#[derive(Debug)]
pub struct MockFactory {
    behavior: MockBehavior,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    created: AtomicUsize,
    fail_loads: AtomicBool,
}

impl MockFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub fn responding(text: impl Into<String>) -> Self {
        Self::new(MockBehavior::Respond(text.into()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every following `create` fail (or succeed again)
    pub fn set_load_failure(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Total `generate` calls across every backend this factory built
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of backends built so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(BackendError::load("mock load failure"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(
            MockBackend::new(self.behavior.clone())
                .with_latency(self.latency)
                .with_call_counter(self.calls.clone()),
        ))
    }

    fn describe(&self) -> String {
        format!("mock({:?})", self.behavior)
    }
}
