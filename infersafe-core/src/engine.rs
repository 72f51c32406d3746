//! Composition root: wires the queue, pool, dispatcher and autoscaler
//! together and owns their background loops.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::autoscaler::Autoscaler;
use crate::backend::BackendFactory;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, PoolError};
use crate::handle::{Outcome, ResultHandle};
use crate::metrics::MetricsRecorder;
use crate::pool::{WorkerPool, WorkerStatus};
use crate::queue::AdmissionQueue;
use crate::stream::{caller_timeout, token_stream};

pub const RELOAD_OK: &str = "Model reloaded successfully";

/// Failure while starting the engine
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Running inference front end
pub struct Engine {
    config: EngineConfig,
    queue: Arc<AdmissionQueue>,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Validate `config`, build the pool and start the cut and scaling loops
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        config: EngineConfig,
        factory: Arc<dyn BackendFactory>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, StartError> {
        config.validate()?;
        if !config.scale_up_reachable() {
            warn!(
                scale_up_threshold = config.autoscaler.scale_up_threshold,
                worker_concurrency = config.pool.worker_concurrency,
                "Scale-up threshold is not below worker concurrency; load-based scale-up will not trigger"
            );
        }

        let pool = Arc::new(
            WorkerPool::new(&config.pool, config.autoscaler.min_workers, factory).await?,
        );
        let queue = Arc::new(AdmissionQueue::new(config.queue.clone(), metrics.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            config.dispatch.clone(),
            metrics.clone(),
        ));
        let autoscaler = Autoscaler::new(pool.clone(), config.autoscaler.clone(), metrics);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(queue.clone().run_cut_loop(dispatcher.clone(), shutdown_rx.clone())),
            tokio::spawn(autoscaler.run(shutdown_rx)),
        ];

        info!(
            workers = config.pool.initial_workers,
            queue_capacity = config.queue.capacity,
            batch_size_limit = config.queue.batch_size_limit,
            max_retries = config.dispatch.max_retries,
            "Engine started"
        );

        Ok(Self {
            config,
            queue,
            pool,
            dispatcher,
            shutdown_tx,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue a request; the handle resolves once its batch has run
    pub async fn submit(&self, prompt: impl Into<String>, max_tokens: u32) -> ResultHandle {
        self.queue.enqueue(prompt, max_tokens).await
    }

    /// Dispatch one request immediately and wait for its outcome
    pub async fn run_single(&self, prompt: impl Into<String>, max_tokens: u32) -> Outcome {
        self.dispatcher.clone().run_single(prompt, max_tokens).await
    }

    /// Caller wait deadline for the current backlog
    pub async fn caller_timeout(&self) -> Duration {
        caller_timeout(self.queue.len().await, self.config.queue.batch_size_limit)
    }

    /// Queue a request and stream its rendered outcome
    pub async fn submit_streaming(
        &self,
        prompt: impl Into<String>,
        max_tokens: u32,
    ) -> impl Stream<Item = String> + Send + 'static {
        let handle = self.submit(prompt, max_tokens).await;
        // Backlog now counts this request too
        let timeout = self.caller_timeout().await;
        token_stream(handle, timeout)
    }

    /// Rebuild every worker's backend
    pub async fn reload(&self) -> Result<usize, PoolError> {
        match self.pool.reload_all().await {
            Ok(workers) => {
                info!(workers, "{}", RELOAD_OK);
                Ok(workers)
            }
            Err(e) => {
                error!(error = %e, "Failed to reload model");
                Err(e)
            }
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn total_in_flight(&self) -> usize {
        self.pool.total_in_flight().await
    }

    pub async fn pool_size(&self) -> usize {
        self.pool.size().await
    }

    pub async fn workers(&self) -> Vec<WorkerStatus> {
        self.pool.snapshot().await
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Whether the background loops have been asked to stop
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop both loops and wait for them
    ///
    /// Requests still queued resolve to `Shutdown`; batches already running
    /// finish on their own.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!("Engine shutting down");

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBehavior, MockFactory};
    use crate::config::{PoolConfig, QueueConfig};
    use crate::error::InferenceError;
    use crate::metrics::PipelineMetrics;
    use futures::StreamExt;

    fn test_config() -> EngineConfig {
        EngineConfig {
            queue: QueueConfig {
                capacity: 4,
                batch_size_limit: 2,
                cut_interval: Duration::from_millis(10),
                ..QueueConfig::default()
            },
            pool: PoolConfig {
                initial_workers: 2,
                worker_concurrency: 4,
            },
            ..EngineConfig::default()
        }
    }

    async fn start(factory: Arc<MockFactory>) -> (Engine, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let engine = Engine::start(test_config(), factory, metrics.clone())
            .await
            .unwrap();
        (engine, metrics)
    }

    #[tokio::test]
    async fn test_end_to_end_mock_response() {
        let (engine, metrics) = start(Arc::new(MockFactory::responding("mock response"))).await;

        let handle = engine.submit("hello", 20).await;
        assert_eq!(handle.wait().await, Ok("mock response".to_string()));
        assert_eq!(metrics.snapshot().requests_succeeded, 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_single() {
        let (engine, _) = start(Arc::new(MockFactory::responding("mock response"))).await;
        assert_eq!(
            engine.run_single("hello", 20).await,
            Ok("mock response".to_string())
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_streaming_submit() {
        let (engine, _) = start(Arc::new(MockFactory::responding("mock response"))).await;
        let out: Vec<String> = engine.submit_streaming("hello", 20).await.collect().await;
        assert_eq!(out, vec!["mock ", "response "]);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_is_immediate() {
        let mut config = test_config();
        // Long interval keeps the queue from being cut during the test
        config.queue.cut_interval = Duration::from_secs(3600);
        let engine = Engine::start(
            config,
            Arc::new(MockFactory::new(MockBehavior::Hang)),
            Arc::new(PipelineMetrics::new()),
        )
        .await
        .unwrap();

        for i in 0..4 {
            let handle = engine.submit(format!("req {}", i), 8).await;
            assert!(!handle.is_resolved());
        }
        let rejected = engine.submit("one too many", 8).await;
        assert_eq!(
            rejected.try_outcome(),
            Some(Err(InferenceError::QueueFull { capacity: 4 }))
        );
        assert_eq!(engine.queue_len().await, 4);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queue() {
        let mut config = test_config();
        config.queue.cut_interval = Duration::from_secs(3600);
        let engine = Engine::start(
            config,
            Arc::new(MockFactory::responding("x")),
            Arc::new(PipelineMetrics::new()),
        )
        .await
        .unwrap();

        let handle = engine.submit("queued", 8).await;
        engine.shutdown().await;
        assert_eq!(handle.try_outcome(), Some(Err(InferenceError::Shutdown)));
        assert!(engine.is_shutting_down());

        // Second shutdown is a no-op
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_deadline_counts_admitted_request() {
        let mut config = test_config();
        config.queue.capacity = 20;
        config.queue.batch_size_limit = 10;
        config.queue.cut_interval = Duration::from_secs(3600);
        let engine = Engine::start(
            config,
            Arc::new(MockFactory::new(MockBehavior::Hang)),
            Arc::new(PipelineMetrics::new()),
        )
        .await
        .unwrap();

        for i in 0..9 {
            engine.submit(format!("req {}", i), 8).await;
        }

        // Ten queued with a limit of ten: 10s + 1 * 5s
        let start = tokio::time::Instant::now();
        let out: Vec<String> = engine.submit_streaming("tenth", 8).await.collect().await;
        assert_eq!(engine.queue_len().await, 10);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(out, vec!["Error: Request timed out, please try again"]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload() {
        let factory = Arc::new(MockFactory::responding("x"));
        let (engine, _) = start(factory.clone()).await;
        assert_eq!(engine.reload().await, Ok(2));

        factory.set_load_failure(true);
        assert!(engine.reload().await.is_err());
        assert_eq!(engine.pool_size().await, 2);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.queue.batch_size_limit = 10;
        let result = Engine::start(
            config,
            Arc::new(MockFactory::responding("x")),
            Arc::new(PipelineMetrics::new()),
        )
        .await;
        assert!(matches!(result, Err(StartError::Config(_))));
    }

    #[tokio::test]
    async fn test_introspection() {
        let (engine, _) = start(Arc::new(MockFactory::responding("x"))).await;
        assert_eq!(engine.pool_size().await, 2);
        assert_eq!(engine.total_in_flight().await, 0);
        assert_eq!(engine.queue_len().await, 0);
        assert_eq!(engine.caller_timeout().await, Duration::from_secs(10));
        let names: Vec<String> = engine.workers().await.into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["worker_0", "worker_1"]);
        engine.shutdown().await;
    }
}
