//! Application state for the InferSafe server.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use infersafe_core::config::EngineConfig;
use infersafe_core::engine::{Engine, StartError};
use infersafe_core::metrics::PipelineMetrics;

use crate::backend::build_factory;
use crate::metrics::PrometheusRecorder;

/// Which inference backend the workers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-process stub answering with a fixed text
    #[default]
    Mock,
    /// Ollama server reached over HTTP
    Ollama,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(BackendKind::Mock),
            "ollama" => Ok(BackendKind::Ollama),
            other => Err(format!("unknown backend '{}', expected mock or ollama", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Mock => write!(f, "mock"),
            BackendKind::Ollama => write!(f, "ollama"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Backend behind the workers
    pub backend: BackendKind,

    /// Ollama base URL
    pub ollama_url: String,

    /// Model loaded on every worker
    pub model: String,

    /// Text returned by the mock backend
    pub mock_response: String,

    /// HTTP timeout for a single Ollama call
    pub backend_request_timeout: Duration,

    /// Whether to print the banner on startup
    pub print_banner: bool,

    /// Queue, pool, dispatch and autoscaler settings
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            backend: BackendKind::Mock,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            mock_response: "mock response".to_string(),
            backend_request_timeout: Duration::from_secs(300),
            print_banner: true,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("INFERSAFE_HOST").unwrap_or(defaults.host),
            port: std::env::var("INFERSAFE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            backend: std::env::var("INFERSAFE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backend),
            ollama_url: std::env::var("OLLAMA_HOST")
                .or_else(|_| std::env::var("OLLAMA_URL"))
                .unwrap_or(defaults.ollama_url),
            model: std::env::var("INFERSAFE_MODEL").unwrap_or(defaults.model),
            mock_response: std::env::var("INFERSAFE_MOCK_RESPONSE")
                .unwrap_or(defaults.mock_response),
            backend_request_timeout: std::env::var("INFERSAFE_BACKEND_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.backend_request_timeout),
            print_banner: defaults.print_banner,
            engine: EngineConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Application state shared across all handlers
pub struct AppState {
    /// Running pipeline
    pub engine: Engine,

    /// In-process counters, also exported to Prometheus
    pub metrics: Arc<PipelineMetrics>,

    /// Configuration
    pub config: ServerConfig,

    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Build the backend factory and start the engine
    pub async fn new(config: ServerConfig) -> Result<Self, StartError> {
        let metrics = Arc::new(PipelineMetrics::new());
        let recorder = Arc::new(PrometheusRecorder::new(metrics.clone()));
        let engine = Engine::start(config.engine.clone(), build_factory(&config), recorder).await?;

        Ok(Self {
            engine,
            metrics,
            config,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.backend, BackendKind::Mock);
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("mock".parse::<BackendKind>(), Ok(BackendKind::Mock));
        assert_eq!(" Ollama ".parse::<BackendKind>(), Ok(BackendKind::Ollama));
        assert!("llamacpp".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Ollama.to_string(), "ollama");
    }

    #[tokio::test]
    async fn test_state_starts_mock_engine() {
        let state = AppState::new(ServerConfig::default()).await.unwrap();
        assert_eq!(state.engine.pool_size().await, 3);
        assert_eq!(
            state.engine.run_single("hello", 20).await,
            Ok("mock response".to_string())
        );
        assert_eq!(state.metrics.snapshot().requests_succeeded, 1);
        state.engine.shutdown().await;
    }
}
