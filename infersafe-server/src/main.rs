//! InferSafe server - fault-tolerant front end for LLM inference.
//!
//! Queues generate requests, cuts them into batches, dispatches each request
//! to the least loaded worker with per-attempt timeouts and retries, and
//! resizes the worker pool with load.
//!
//! ## Quick Start
//!
//! ```bash
//! # Mock backend on port 8000
//! infersafe-server
//!
//! # Ollama backend
//! INFERSAFE_BACKEND=ollama INFERSAFE_MODEL=mistral:7b infersafe-server
//! ```

use infersafe_server::{run_server, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("infersafe_core=info,infersafe_server=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    run_server(ServerConfig::from_env()).await
}
