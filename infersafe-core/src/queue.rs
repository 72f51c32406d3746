//! Bounded FIFO admission queue and the loop that cuts it into batches.
//!
//! ```text
//!   enqueue ──► [ r0 r1 r2 ... rN ]  (≤ capacity)
//!                     │ every cut_interval
//!                     ▼
//!        [r0..r9] [r10..r19] [r20..rN]  (≤ batch_size_limit each)
//!            │         │          │
//!            ▼         ▼          ▼
//!        dispatch  dispatch   dispatch   (concurrent batch jobs)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::dispatcher::Dispatcher;
use crate::error::InferenceError;
use crate::handle::ResultHandle;
use crate::metrics::MetricsRecorder;
use crate::worker::preview;

/// One generation job waiting for, or undergoing, dispatch
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub prompt: String,
    pub max_tokens: u32,
    pub handle: ResultHandle,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            max_tokens,
            handle: ResultHandle::pending(),
            enqueued_at: Instant::now(),
        }
    }
}

/// Bounded FIFO of pending requests
pub struct AdmissionQueue {
    config: QueueConfig,
    queue: Mutex<VecDeque<PendingRequest>>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl AdmissionQueue {
    pub fn new(config: QueueConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
            config,
            metrics,
        }
    }

    /// Admit a request, returning the handle its outcome will land in
    ///
    /// A full queue or a zero token budget yields an already-failed handle
    /// and leaves the queue untouched.
    pub async fn enqueue(&self, prompt: impl Into<String>, max_tokens: u32) -> ResultHandle {
        if max_tokens == 0 {
            return ResultHandle::resolved(Err(InferenceError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            )));
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.capacity {
            drop(queue);
            self.metrics.record_rejected();
            warn!(capacity = self.config.capacity, "Queue full, rejecting request");
            return ResultHandle::resolved(Err(InferenceError::QueueFull {
                capacity: self.config.capacity,
            }));
        }

        let request = PendingRequest::new(prompt, max_tokens);
        let handle = request.handle.clone();
        debug!(
            id = %request.id,
            prompt = %preview(&request.prompt),
            queue_len = queue.len(),
            "Enqueuing request"
        );
        queue.push_back(request);
        let len = queue.len();
        drop(queue);

        self.metrics.record_enqueued(len);
        handle
    }

    /// Current number of queued requests
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Take everything queued, split front to back into batches
    pub async fn cut(&self) -> Vec<Vec<PendingRequest>> {
        let taken: Vec<PendingRequest> = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return Vec::new();
            }
            let taken = queue.drain(..).collect();
            self.metrics.record_queue_len(queue.len());
            taken
        };

        let limit = self.config.batch_size_limit.max(1);
        let mut batches = Vec::with_capacity(taken.len().div_ceil(limit));
        let mut rest = taken.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(limit).collect());
        }
        batches
    }

    /// Resolve every queued request with `reason`, returning how many there were
    pub async fn drain(&self, reason: InferenceError) -> usize {
        let drained: Vec<PendingRequest> = self.queue.lock().await.drain(..).collect();
        self.metrics.record_queue_len(0);
        for request in &drained {
            request.handle.resolve(Err(reason.clone()));
        }
        drained.len()
    }

    /// Cut the queue every `cut_interval` and dispatch each batch concurrently
    ///
    /// Runs until `shutdown` flips. A batch job that dies (a panic surfaces
    /// as a join error) is logged and followed by an error backoff; the loop
    /// itself keeps going.
    pub async fn run_cut_loop(
        self: Arc<Self>,
        dispatcher: Arc<Dispatcher>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = self.config.cut_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut jobs: JoinSet<()> = JoinSet::new();

        info!(
            interval_ms = interval.as_millis() as u64,
            batch_size_limit = self.config.batch_size_limit,
            capacity = self.config.capacity,
            "Batch loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let mut failures = 0usize;
            while let Some(joined) = jobs.try_join_next() {
                if let Err(e) = joined {
                    failures += 1;
                    error!(error = %e, "Error in batch processing loop");
                }
            }
            if failures > 0 {
                tokio::time::sleep(self.config.error_backoff).await;
            }

            for batch in self.cut().await {
                debug!(size = batch.len(), "Dispatching batch");
                jobs.spawn(dispatcher.clone().dispatch_batch(batch));
            }
        }

        let dropped = self.drain(InferenceError::Shutdown).await;
        // Batches already running finish on their own
        jobs.detach_all();
        info!(dropped, "Batch loop stopped");
    }
}
