//! Configuration for the admission queue, worker pool, dispatcher and autoscaler.

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the admission queue and its cut loop
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of requests waiting for dispatch
    pub capacity: usize,

    /// Maximum number of requests per dispatched batch
    /// Must be smaller than `capacity`
    pub batch_size_limit: usize,

    /// How often the queue is cut into batches
    pub cut_interval: Duration,

    /// Pause after an unexpected failure in the cut loop
    pub error_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            batch_size_limit: 10,
            cut_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers created at startup
    pub initial_workers: usize,

    /// Concurrent backend calls allowed per worker
    pub worker_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 3,
            worker_concurrency: 4,
        }
    }
}

/// Configuration for the batch dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for a single attempt
    pub attempt_timeout: Duration,

    /// Retries after the first attempt; a request gets `max_retries + 1` attempts
    pub max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            max_retries: 5,
        }
    }
}

impl DispatchConfig {
    /// Total attempts a request may use
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Configuration for the autoscaling control loop
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// Average in-flight requests per worker above which the pool grows
    pub scale_up_threshold: f64,

    /// Average in-flight requests per worker below which the pool shrinks
    pub scale_down_threshold: f64,

    /// The pool never shrinks below this
    pub min_workers: usize,

    /// Optional ceiling; `None` leaves growth unbounded
    pub max_workers: Option<usize>,

    /// Minimum time between two scaling actions
    pub cooldown: Duration,

    /// Sampling interval
    pub interval: Duration,

    /// Pause after an internal error before the next tick
    pub error_backoff: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 5.0,
            scale_down_threshold: 1.0,
            min_workers: 1,
            max_workers: None,
            cooldown: Duration::from_secs(15),
            interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    pub autoscaler: AutoscalerConfig,
}

impl EngineConfig {
    /// Create config optimized for low latency (single user, fast failure)
    pub fn low_latency() -> Self {
        Self {
            queue: QueueConfig {
                capacity: 20,
                batch_size_limit: 1,
                cut_interval: Duration::from_millis(10),
                ..QueueConfig::default()
            },
            pool: PoolConfig {
                initial_workers: 1,
                worker_concurrency: 1,
            },
            dispatch: DispatchConfig {
                attempt_timeout: Duration::from_secs(5),
                max_retries: 1,
            },
            autoscaler: AutoscalerConfig {
                max_workers: Some(2),
                ..AutoscalerConfig::default()
            },
        }
    }

    /// Create config optimized for high throughput (many concurrent users)
    pub fn high_throughput() -> Self {
        Self {
            queue: QueueConfig {
                capacity: 1000,
                batch_size_limit: 32,
                ..QueueConfig::default()
            },
            pool: PoolConfig {
                initial_workers: 4,
                worker_concurrency: 8,
            },
            dispatch: DispatchConfig::default(),
            autoscaler: AutoscalerConfig {
                scale_up_threshold: 6.0,
                scale_down_threshold: 2.0,
                min_workers: 2,
                cooldown: Duration::from_secs(30),
                ..AutoscalerConfig::default()
            },
        }
    }

    /// Create config from environment variables
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("INFERSAFE_QUEUE_CAPACITY") {
            config.queue.capacity = n;
        }
        if let Some(n) = env_parse("INFERSAFE_BATCH_SIZE") {
            config.queue.batch_size_limit = n;
        }
        if let Some(ms) = env_parse("INFERSAFE_BATCH_INTERVAL_MS") {
            config.queue.cut_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("INFERSAFE_WORKERS") {
            config.pool.initial_workers = n;
        }
        if let Some(n) = env_parse("INFERSAFE_WORKER_CONCURRENCY") {
            config.pool.worker_concurrency = n;
        }
        if let Some(secs) = env_parse("INFERSAFE_INFERENCE_TIMEOUT_SECS") {
            config.dispatch.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("INFERSAFE_MAX_RETRIES") {
            config.dispatch.max_retries = n;
        }
        if let Some(v) = env_parse("INFERSAFE_SCALE_UP_THRESHOLD") {
            config.autoscaler.scale_up_threshold = v;
        }
        if let Some(v) = env_parse("INFERSAFE_SCALE_DOWN_THRESHOLD") {
            config.autoscaler.scale_down_threshold = v;
        }
        if let Some(n) = env_parse("INFERSAFE_MIN_WORKERS") {
            config.autoscaler.min_workers = n;
        }
        if let Some(n) = env_parse("INFERSAFE_MAX_WORKERS") {
            config.autoscaler.max_workers = Some(n);
        }
        if let Some(secs) = env_parse("INFERSAFE_SCALE_COOLDOWN_SECS") {
            config.autoscaler.cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("INFERSAFE_SCALE_INTERVAL_SECS") {
            config.autoscaler.interval = Duration::from_secs(secs);
        }

        config
    }

    /// Whether the average load can ever pass the scale-up threshold
    ///
    /// A worker never holds more than `worker_concurrency` calls, so a
    /// threshold at or above it only triggers below `min_workers`.
    pub fn scale_up_reachable(&self) -> bool {
        self.autoscaler.scale_up_threshold < self.pool.worker_concurrency as f64
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Zero { field: "queue.capacity" });
        }
        if self.queue.batch_size_limit == 0 {
            return Err(ConfigError::Zero { field: "queue.batch_size_limit" });
        }
        if self.queue.batch_size_limit >= self.queue.capacity {
            return Err(ConfigError::not_below(
                "queue.batch_size_limit",
                self.queue.batch_size_limit,
                "queue.capacity",
                self.queue.capacity,
            ));
        }
        if self.queue.cut_interval.is_zero() {
            return Err(ConfigError::Zero { field: "queue.cut_interval" });
        }
        if self.pool.worker_concurrency == 0 {
            return Err(ConfigError::Zero { field: "pool.worker_concurrency" });
        }
        if self.autoscaler.min_workers == 0 {
            return Err(ConfigError::Zero { field: "autoscaler.min_workers" });
        }
        if self.pool.initial_workers < self.autoscaler.min_workers {
            return Err(ConfigError::not_below(
                "autoscaler.min_workers",
                self.autoscaler.min_workers,
                "pool.initial_workers + 1",
                self.pool.initial_workers + 1,
            ));
        }
        if let Some(max) = self.autoscaler.max_workers {
            if max < self.autoscaler.min_workers {
                return Err(ConfigError::not_below(
                    "autoscaler.min_workers",
                    self.autoscaler.min_workers,
                    "autoscaler.max_workers + 1",
                    max + 1,
                ));
            }
        }
        if self.autoscaler.scale_down_threshold >= self.autoscaler.scale_up_threshold {
            return Err(ConfigError::not_below(
                "autoscaler.scale_down_threshold",
                self.autoscaler.scale_down_threshold,
                "autoscaler.scale_up_threshold",
                self.autoscaler.scale_up_threshold,
            ));
        }
        if self.autoscaler.interval.is_zero() {
            return Err(ConfigError::Zero { field: "autoscaler.interval" });
        }
        if self.dispatch.attempt_timeout.is_zero() {
            return Err(ConfigError::Zero { field: "dispatch.attempt_timeout" });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.queue.batch_size_limit, 10);
        assert_eq!(config.queue.cut_interval, Duration::from_millis(100));
        assert_eq!(config.pool.worker_concurrency, 4);
        assert_eq!(config.dispatch.max_retries, 5);
        assert_eq!(config.dispatch.max_attempts(), 6);
        assert_eq!(config.dispatch.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.autoscaler.scale_up_threshold, 5.0);
        assert_eq!(config.autoscaler.scale_down_threshold, 1.0);
        assert_eq!(config.autoscaler.min_workers, 1);
        assert_eq!(config.autoscaler.cooldown, Duration::from_secs(15));
        assert_eq!(config.autoscaler.interval, Duration::from_secs(5));
        assert!(config.autoscaler.max_workers.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(EngineConfig::low_latency().validate().is_ok());
        assert!(EngineConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_batch_larger_than_capacity_rejected() {
        let mut config = EngineConfig::default();
        config.queue.batch_size_limit = 200;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotBelow { field: "queue.batch_size_limit", .. })
        ));

        // Equal to capacity is not smaller than it
        config.queue.batch_size_limit = config.queue.capacity;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotBelow { field: "queue.batch_size_limit", .. })
        ));

        config.queue.batch_size_limit = config.queue.capacity - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scale_up_reachable() {
        let mut config = EngineConfig::default();
        // Threshold 5 over 4 slots per worker
        assert!(!config.scale_up_reachable());

        config.autoscaler.scale_up_threshold = 3.0;
        assert!(config.scale_up_reachable());

        config.autoscaler.scale_up_threshold = 4.0;
        assert!(!config.scale_up_reachable());
    }

    #[test]
    fn test_zero_min_workers_rejected() {
        let mut config = EngineConfig::default();
        config.autoscaler.min_workers = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { field: "autoscaler.min_workers" })
        );
    }

    #[test]
    fn test_initial_below_min_rejected() {
        let mut config = EngineConfig::default();
        config.pool.initial_workers = 1;
        config.autoscaler.min_workers = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.autoscaler.scale_down_threshold = 6.0;
        assert!(config.validate().is_err());
    }
}
