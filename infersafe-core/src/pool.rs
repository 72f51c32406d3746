//! Resizable pool of workers with least-loaded selection.
//!
//! The worker list sits behind one coarse `RwLock`: selection takes the read
//! side on every dispatch attempt, while scale-up, scale-down and reload are
//! rare and take the write side only for the list mutation itself. Backend
//! construction happens outside the lock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::BackendFactory;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::worker::Worker;

/// Ordered, never-empty collection of workers
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<Worker>>>,
    factory: Arc<dyn BackendFactory>,
    min_workers: usize,
    worker_concurrency: usize,
}

impl WorkerPool {
    /// Build a pool with `config.initial_workers` workers
    ///
    /// `min_workers` is the floor `scale_down` never crosses.
    pub async fn new(
        config: &PoolConfig,
        min_workers: usize,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, PoolError> {
        let min_workers = min_workers.max(1);
        if config.initial_workers < min_workers {
            return Err(PoolError::TooFewWorkers {
                requested: config.initial_workers,
                min: min_workers,
            });
        }

        let mut workers = Vec::with_capacity(config.initial_workers);
        for idx in 0..config.initial_workers {
            let name = worker_name(idx);
            let backend = factory
                .create()
                .await
                .map_err(|e| PoolError::backend(&name, e))?;
            workers.push(Arc::new(Worker::new(name, backend, config.worker_concurrency)));
        }

        info!(
            workers = workers.len(),
            min_workers,
            concurrency = config.worker_concurrency,
            backend = %factory.describe(),
            "Worker pool ready"
        );

        Ok(Self {
            workers: RwLock::new(workers),
            factory,
            min_workers,
            worker_concurrency: config.worker_concurrency,
        })
    }

    /// Worker with the fewest in-flight calls, first one on ties
    ///
    /// Concurrent callers may pick the same worker; the balancing is soft.
    pub async fn select_worker(&self) -> Option<Arc<Worker>> {
        let workers = self.workers.read().await;
        let chosen = workers.iter().min_by_key(|w| w.in_flight_count()).cloned();
        if let Some(worker) = &chosen {
            tracing::debug!(
                worker = %worker.name(),
                in_flight = worker.in_flight_count(),
                "Selected worker"
            );
        }
        chosen
    }

    /// Append one worker with a fresh backend, returning the new size
    pub async fn scale_up(&self) -> Result<usize, PoolError> {
        let backend = self.factory.create().await.map_err(|e| {
            PoolError::backend("new worker", e)
        })?;

        let mut workers = self.workers.write().await;
        let name = worker_name(workers.len());
        info!(worker = %name, "Scaling up: spawning worker");
        workers.push(Arc::new(Worker::new(name, backend, self.worker_concurrency)));
        Ok(workers.len())
    }

    /// Remove the most recently added worker unless the pool is at its floor
    ///
    /// Returns the removed worker's name. Calls already running on it finish
    /// normally; the backend is released once they do.
    pub async fn scale_down(&self) -> Option<String> {
        let mut workers = self.workers.write().await;
        if workers.len() <= self.min_workers {
            return None;
        }
        let removed = workers.pop()?;
        info!(
            worker = %removed.name(),
            in_flight = removed.in_flight_count(),
            "Scaling down: removing worker"
        );
        Some(removed.name().to_string())
    }

    /// Replace every worker's backend with a freshly built one, in order
    ///
    /// Stops at the first failure; workers reloaded before it keep their new
    /// backend. Pool size never changes.
    pub async fn reload_all(&self) -> Result<usize, PoolError> {
        let workers: Vec<Arc<Worker>> = self.workers.read().await.clone();
        info!(workers = workers.len(), backend = %self.factory.describe(), "Reloading all workers");

        for worker in &workers {
            let backend = self.factory.create().await.map_err(|e| {
                warn!(worker = %worker.name(), error = %e, "Reload failed");
                PoolError::backend(worker.name(), e)
            })?;
            worker.replace_backend(backend).await;
        }

        info!(workers = workers.len(), "All workers reloaded");
        Ok(workers.len())
    }

    /// Sum of in-flight calls across all workers
    pub async fn total_in_flight(&self) -> usize {
        self.workers
            .read()
            .await
            .iter()
            .map(|w| w.in_flight_count())
            .sum()
    }

    pub async fn size(&self) -> usize {
        self.workers.read().await.len()
    }

    pub fn min_workers(&self) -> usize {
        self.min_workers
    }

    /// Name and in-flight count of every worker, in pool order
    pub async fn snapshot(&self) -> Vec<WorkerStatus> {
        self.workers
            .read()
            .await
            .iter()
            .map(|w| WorkerStatus {
                name: w.name().to_string(),
                in_flight: w.in_flight_count(),
                concurrency_limit: w.concurrency_limit(),
            })
            .collect()
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub in_flight: usize,
    pub concurrency_limit: usize,
}

fn worker_name(idx: usize) -> String {
    format!("worker_{}", idx)
}

/// What the autoscaler needs from a pool
#[async_trait]
pub trait ScalingTarget: Send + Sync {
    async fn total_in_flight(&self) -> usize;
    async fn size(&self) -> usize;
    async fn scale_up(&self) -> Result<usize, PoolError>;
    async fn scale_down(&self) -> Option<String>;
}

#[async_trait]
impl ScalingTarget for WorkerPool {
    async fn total_in_flight(&self) -> usize {
        WorkerPool::total_in_flight(self).await
    }

    async fn size(&self) -> usize {
        WorkerPool::size(self).await
    }

    async fn scale_up(&self) -> Result<usize, PoolError> {
        WorkerPool::scale_up(self).await
    }

    async fn scale_down(&self) -> Option<String> {
        WorkerPool::scale_down(self).await
    }
}
