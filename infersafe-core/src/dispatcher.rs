//! Batch dispatcher: per-request retry and timeout orchestration.
//!
//! Every request in a batch runs concurrently. Each attempt re-selects the
//! least loaded worker and is bounded by `attempt_timeout`; timeouts and
//! backend failures are retried until `max_retries + 1` attempts are used,
//! after which the request resolves to `RetriesExhausted`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::DispatchConfig;
use crate::error::InferenceError;
use crate::handle::{Outcome, ResultHandle};
use crate::metrics::{MetricsRecorder, RetryReason};
use crate::pool::WorkerPool;
use crate::queue::PendingRequest;

/// Resolves the request as aborted if its dispatch future is dropped early;
/// a no-op once the request has been resolved
struct AbortGuard<'a> {
    handle: &'a ResultHandle,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        self.handle.resolve(Err(InferenceError::Aborted));
    }
}

/// Result of one attempt, tagged with the worker that took it
struct Attempt {
    worker: Option<String>,
    latency: Duration,
    outcome: Outcome,
}

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    config: DispatchConfig,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        config: DispatchConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            pool,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Process one batch, resolving every request's handle
    pub async fn dispatch_batch(self: Arc<Self>, batch: Vec<PendingRequest>) {
        let size = batch.len();
        info!(size, "Processing batch");
        self.metrics.record_batch(size);

        let results = join_all(
            batch
                .iter()
                .enumerate()
                .map(|(idx, request)| self.process_request(idx, request)),
        )
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        info!(size, failed, "Completed batch");
    }

    /// Submit-and-await in one call, bypassing the admission queue
    pub async fn run_single(self: Arc<Self>, prompt: impl Into<String>, max_tokens: u32) -> Outcome {
        if max_tokens == 0 {
            return Err(InferenceError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }
        let request = PendingRequest::new(prompt, max_tokens);
        let handle = request.handle.clone();
        self.dispatch_batch(vec![request]).await;
        handle.wait().await
    }

    /// Run the attempts for one request; `true` if it succeeded
    #[instrument(skip(self, request), fields(id = %request.id))]
    async fn process_request(&self, idx: usize, request: &PendingRequest) -> bool {
        let _guard = AbortGuard {
            handle: &request.handle,
        };
        let max_attempts = self.config.max_attempts();

        for attempt in 1..=max_attempts {
            let Attempt {
                worker,
                latency,
                outcome,
            } = self.attempt(request).await;
            let worker = worker.as_deref().unwrap_or("-");

            match outcome {
                Ok(text) => {
                    self.metrics.record_latency(latency);
                    if request.handle.resolve(Ok(text)) {
                        self.metrics.record_success();
                    }
                    info!(
                        request = idx,
                        worker,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "Request processed"
                    );
                    return true;
                }
                Err(err) => {
                    let reason = match &err {
                        InferenceError::AttemptTimeout { .. } => RetryReason::Timeout,
                        InferenceError::NoWorkers => RetryReason::NoWorkers,
                        _ => RetryReason::BackendError,
                    };
                    self.metrics.record_retry(reason);
                    if reason == RetryReason::BackendError {
                        self.metrics.record_latency(latency);
                    }
                    error!(
                        request = idx,
                        worker,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Attempt failed"
                    );
                }
            }
        }

        if request.handle.resolve(Err(InferenceError::RetriesExhausted {
            attempts: max_attempts,
        })) {
            self.metrics.record_failure();
        }
        warn!(request = idx, attempts = max_attempts, "Inference failed after all retries");
        false
    }

    /// One attempt: pick a worker, invoke it under the attempt deadline
    async fn attempt(&self, request: &PendingRequest) -> Attempt {
        let started = Instant::now();
        let Some(worker) = self.pool.select_worker().await else {
            return Attempt {
                worker: None,
                latency: started.elapsed(),
                outcome: Err(InferenceError::NoWorkers),
            };
        };

        let timeout = self.config.attempt_timeout;
        let outcome =
            match tokio::time::timeout(timeout, worker.invoke(&request.prompt, request.max_tokens))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(InferenceError::AttemptTimeout { timeout }),
            };

        Attempt {
            worker: Some(worker.name().to_string()),
            latency: started.elapsed(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendFactory, InferenceBackend, MockBehavior, MockFactory};
    use crate::config::PoolConfig;
    use crate::error::BackendError;
    use crate::metrics::PipelineMetrics;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn dispatcher_with(
        factory: Arc<dyn BackendFactory>,
        workers: usize,
        config: DispatchConfig,
    ) -> (Arc<Dispatcher>, Arc<PipelineMetrics>) {
        let pool_config = PoolConfig {
            initial_workers: workers,
            worker_concurrency: 4,
        };
        let pool = Arc::new(WorkerPool::new(&pool_config, 1, factory).await.unwrap());
        let metrics = Arc::new(PipelineMetrics::new());
        (
            Arc::new(Dispatcher::new(pool, config, metrics.clone())),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_run_single_success() {
        let factory = Arc::new(MockFactory::responding("mock response"));
        let (dispatcher, metrics) = dispatcher_with(factory, 2, DispatchConfig::default()).await;

        let outcome = dispatcher.run_single("hello", 20).await;
        assert_eq!(outcome, Ok("mock response".to_string()));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_processed, 1);
        assert_eq!(snapshot.requests_succeeded, 1);
        assert_eq!(snapshot.retries_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_timing_out_uses_every_attempt() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Hang));
        let config = DispatchConfig {
            attempt_timeout: Duration::from_secs(10),
            max_retries: 5,
        };
        let (dispatcher, metrics) = dispatcher_with(factory.clone(), 3, config).await;

        let outcome = dispatcher.run_single("hello", 20).await;
        assert_eq!(outcome, Err(InferenceError::RetriesExhausted { attempts: 6 }));
        assert_eq!(factory.calls(), 6);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retries_total, 6);
        assert_eq!(snapshot.retries_timeout, 6);
        assert_eq!(snapshot.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_backend_errors_are_retried() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Fail("boom".into())));
        let config = DispatchConfig {
            attempt_timeout: Duration::from_secs(1),
            max_retries: 2,
        };
        let (dispatcher, metrics) = dispatcher_with(factory.clone(), 1, config).await;

        let outcome = dispatcher.run_single("hello", 5).await;
        assert_eq!(outcome, Err(InferenceError::RetriesExhausted { attempts: 3 }));
        assert_eq!(factory.calls(), 3);
        assert_eq!(metrics.snapshot().retries_total, 3);
        assert_eq!(metrics.snapshot().retries_timeout, 0);
    }

    /// Fails the first `failures` calls, then answers
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl InferenceBackend for Flaky {
        async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(BackendError::generation("transient"))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    struct FlakyFactory(Arc<Flaky>);

    #[async_trait]
    impl BackendFactory for FlakyFactory {
        async fn create(&self) -> Result<Arc<dyn InferenceBackend>, BackendError> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let (dispatcher, metrics) = dispatcher_with(
            Arc::new(FlakyFactory(flaky.clone())),
            2,
            DispatchConfig::default(),
        )
        .await;

        let outcome = dispatcher.run_single("hello", 5).await;
        assert_eq!(outcome, Ok("recovered".to_string()));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().retries_total, 2);
    }

    #[tokio::test]
    async fn test_batch_resolves_every_request() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Echo));
        let (dispatcher, metrics) = dispatcher_with(factory, 2, DispatchConfig::default()).await;

        let batch: Vec<PendingRequest> = (0..5)
            .map(|i| PendingRequest::new(format!("prompt {}", i), 8))
            .collect();
        let handles: Vec<ResultHandle> = batch.iter().map(|r| r.handle.clone()).collect();

        dispatcher.dispatch_batch(batch).await;

        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(handle.try_outcome(), Some(Ok(format!("prompt {}", i))));
        }
        assert_eq!(metrics.snapshot().batches_processed, 1);
        assert_eq!(metrics.snapshot().requests_succeeded, 5);
    }

    #[tokio::test]
    async fn test_already_resolved_handle_left_untouched() {
        let factory = Arc::new(MockFactory::responding("fresh"));
        let (dispatcher, _) = dispatcher_with(factory, 1, DispatchConfig::default()).await;

        let request = PendingRequest::new("hello", 5);
        request
            .handle
            .resolve(Err(InferenceError::CallerTimeout {
                timeout: Duration::from_secs(1),
            }));
        let handle = request.handle.clone();

        dispatcher.dispatch_batch(vec![request]).await;
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(InferenceError::CallerTimeout { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_batch_resolves_handles() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Hang));
        let (dispatcher, _) = dispatcher_with(factory, 1, DispatchConfig::default()).await;

        let request = PendingRequest::new("hello", 5);
        let handle = request.handle.clone();
        let job = tokio::spawn(dispatcher.dispatch_batch(vec![request]));
        tokio::time::sleep(Duration::from_millis(1)).await;
        job.abort();
        let _ = job.await;

        assert_eq!(handle.try_outcome(), Some(Err(InferenceError::Aborted)));
    }

    #[tokio::test]
    async fn test_zero_budget_rejected() {
        let factory = Arc::new(MockFactory::responding("x"));
        let (dispatcher, _) = dispatcher_with(factory, 1, DispatchConfig::default()).await;
        assert!(matches!(
            dispatcher.run_single("hello", 0).await,
            Err(InferenceError::InvalidRequest(_))
        ));
    }
}
