//! InferSafe Server Library
//!
//! HTTP front end for the InferSafe pipeline: admission queue, worker pool,
//! retrying dispatcher and autoscaler, served over axum.
//!
//! This library can be used either through the standalone binary or from the
//! `infersafe` CLI.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub mod backend;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use state::{AppState, BackendKind, ServerConfig};

/// Build the router over an already started state
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::root))
        // Generation endpoints
        .route("/generate-batch", post(routes::generate_batch))
        .route("/generate", post(routes::generate))
        .route("/reload-model", post(routes::reload_model))
        // Health endpoints
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/live", get(routes::live))
        .route("/stats", get(routes::stats))
        .route("/metrics", get(routes::metrics))
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the InferSafe server.
///
/// Starts the engine and the HTTP server, and blocks until Ctrl-C. Requests
/// still queued at shutdown resolve with a shutdown error.
///
/// # Example
/// ```no_run
/// use infersafe_server::{run_server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig {
///         port: 8000,
///         ..Default::default()
///     };
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    metrics::init_metrics();

    info!(
        port = config.port,
        backend = %config.backend,
        model = %config.model,
        "Starting InferSafe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone()).await?);
    metrics::set_backend_healthy(true);
    let app = build_router(state.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("InferSafe listening on http://{}", addr);

    if config.print_banner {
        print_banner(&config);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Print the startup banner
fn print_banner(config: &ServerConfig) {
    let engine = &config.engine;

    println!();
    println!("==================================================");
    println!("  InferSafe v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://{}", config.bind_addr());
    match config.backend {
        BackendKind::Mock => println!("  Backend: mock (\"{}\")", config.mock_response),
        BackendKind::Ollama => {
            println!("  Backend: ollama {} at {}", config.model, config.ollama_url)
        }
    }
    println!();
    println!("  Queue:");
    println!(
        "    Capacity: {}, batch size: {}, interval: {}ms",
        engine.queue.capacity,
        engine.queue.batch_size_limit,
        engine.queue.cut_interval.as_millis()
    );
    println!("  Workers:");
    println!(
        "    Initial: {}, concurrency per worker: {}",
        engine.pool.initial_workers, engine.pool.worker_concurrency
    );
    println!(
        "    Autoscale: up > {:.1}, down < {:.1}, min {}, max {}",
        engine.autoscaler.scale_up_threshold,
        engine.autoscaler.scale_down_threshold,
        engine.autoscaler.min_workers,
        engine
            .autoscaler
            .max_workers
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!("  Dispatch:");
    println!(
        "    Attempt timeout: {}s, retries: {}",
        engine.dispatch.attempt_timeout.as_secs(),
        engine.dispatch.max_retries
    );
    println!();
    println!("  Endpoints:");
    println!("    POST /generate-batch, POST /generate, POST /reload-model");
    println!("    GET  /health, /ready, /live, /stats, /metrics");
    println!("==================================================");
    println!();
}
