//! Autoscaling control loop.
//!
//! Every `interval` the autoscaler samples the pool, decides and acts:
//!
//! ```text
//!   IDLE ──tick──► SAMPLING ──► DECIDING ──┬─► SCALE_UP ───┐
//!    ▲                                     ├─► SCALE_DOWN ─┤
//!    │                                     └─► NO_ACTION ──┤
//!    └─────────────────────────────────────────────────────┘
//! ```
//!
//! The cooldown gate is checked before the thresholds, so no action follows
//! another one within `cooldown` regardless of load. Errors are logged and
//! followed by a short backoff; the loop only ends on shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::AutoscalerConfig;
use crate::error::PoolError;
use crate::metrics::{MetricsRecorder, ScaleDirection};
use crate::pool::ScalingTarget;

/// Pool load at one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub in_flight: usize,
    pub workers: usize,
}

/// Why no scaling action was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// The previous action is too recent
    Cooldown,
    /// Load is between the thresholds, or the pool is at its floor
    WithinBounds,
    /// Load asks for growth but `max_workers` is reached
    AtCeiling,
}

/// Decision made by the control loop for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    NoAction(HoldReason),
}

pub struct Autoscaler {
    target: Arc<dyn ScalingTarget>,
    config: AutoscalerConfig,
    metrics: Arc<dyn MetricsRecorder>,
    last_action: Option<Instant>,
}

impl Autoscaler {
    pub fn new(
        target: Arc<dyn ScalingTarget>,
        config: AutoscalerConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            target,
            config,
            metrics,
            last_action: None,
        }
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    /// Average in-flight calls per worker; unbounded below the worker floor
    pub fn average_load(&self, sample: LoadSample) -> f64 {
        if sample.workers < self.config.min_workers || sample.workers == 0 {
            f64::INFINITY
        } else {
            sample.in_flight as f64 / sample.workers as f64
        }
    }

    /// Pure decision for `sample` observed at `now`
    pub fn decide(&self, sample: LoadSample, now: Instant) -> ScalingDecision {
        if let Some(last) = self.last_action {
            if now.saturating_duration_since(last) < self.config.cooldown {
                return ScalingDecision::NoAction(HoldReason::Cooldown);
            }
        }

        let avg_load = self.average_load(sample);
        if avg_load > self.config.scale_up_threshold {
            match self.config.max_workers {
                Some(max) if sample.workers >= max => {
                    ScalingDecision::NoAction(HoldReason::AtCeiling)
                }
                _ => ScalingDecision::ScaleUp,
            }
        } else if avg_load < self.config.scale_down_threshold
            && sample.workers > self.config.min_workers
        {
            ScalingDecision::ScaleDown
        } else {
            ScalingDecision::NoAction(HoldReason::WithinBounds)
        }
    }

    /// Sample, decide and act once
    pub async fn tick(&mut self) -> Result<ScalingDecision, PoolError> {
        let sample = LoadSample {
            in_flight: self.target.total_in_flight().await,
            workers: self.target.size().await,
        };
        self.metrics
            .record_pool_sample(sample.in_flight, sample.workers);

        let avg_load = self.average_load(sample);
        info!(
            in_flight = sample.in_flight,
            workers = sample.workers,
            avg_load = format!("{:.2}", avg_load),
            "Autoscaler status"
        );

        let decision = self.decide(sample, Instant::now());
        match decision {
            ScalingDecision::ScaleUp => {
                info!(
                    avg_load = format!("{:.2}", avg_load),
                    threshold = self.config.scale_up_threshold,
                    "Scaling up"
                );
                // A failed scale-up still starts the cooldown
                self.last_action = Some(Instant::now());
                let workers = self.target.scale_up().await?;
                self.metrics.record_scale(ScaleDirection::Up);
                self.metrics.record_pool_sample(sample.in_flight, workers);
            }
            ScalingDecision::ScaleDown => {
                info!(
                    avg_load = format!("{:.2}", avg_load),
                    threshold = self.config.scale_down_threshold,
                    "Scaling down"
                );
                self.last_action = Some(Instant::now());
                if self.target.scale_down().await.is_some() {
                    self.metrics.record_scale(ScaleDirection::Down);
                }
            }
            ScalingDecision::NoAction(reason) => {
                tracing::debug!(?reason, "No scaling action");
            }
        }

        Ok(decision)
    }

    /// Tick every `interval` until `shutdown` flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = interval.as_secs_f64(),
            cooldown_secs = self.config.cooldown.as_secs_f64(),
            scale_up_threshold = self.config.scale_up_threshold,
            scale_down_threshold = self.config.scale_down_threshold,
            min_workers = self.config.min_workers,
            max_workers = ?self.config.max_workers,
            "Autoscaler started"
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

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in scaling loop");
                tokio::time::sleep(self.config.error_backoff).await;
            }
        }

        info!("Autoscaler stopped");
    }
}
