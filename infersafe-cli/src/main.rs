use std::time::Duration;

use clap::{Parser, Subcommand};
use infersafe_server::{run_server, BackendKind, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};


use load_test::{LoadTestConfig, RequestOutcome};

#[derive(Parser)]
#[command(name = "infersafe")]
#[command(version)]
#[command(about = "InferSafe - Fault-tolerant front end for LLM inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "INFERSAFE_PORT")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long, env = "INFERSAFE_HOST")]
        host: Option<String>,

        /// Backend to use (mock, ollama)
        #[arg(short, long, env = "INFERSAFE_BACKEND")]
        backend: Option<BackendKind>,

        /// Model loaded on every worker
        #[arg(short, long, env = "INFERSAFE_MODEL")]
        model: Option<String>,

        /// Ollama base URL
        #[arg(long, env = "OLLAMA_HOST")]
        ollama_url: Option<String>,

        /// Initial number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Maximum number of requests per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum number of queued requests
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Upper bound on the worker count
        #[arg(long)]
        max_workers: Option<usize>,

        /// Do not print the startup banner
        #[arg(long)]
        no_banner: bool,
    },

    /// Fire concurrent generate requests at a running server
    LoadTest {
        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:8000")]
        url: String,

        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: usize,

        /// Prompt prefix (the request index is appended)
        #[arg(short, long, default_value = "Write me a haiku about autumn")]
        prompt: String,

        /// Token budget per request
        #[arg(long, default_value_t = 20)]
        max_tokens: u32,

        /// Use the synchronous /generate route instead of /generate-batch
        #[arg(long)]
        sync: bool,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout: u64,

        /// Attempts per request on transport errors
        #[arg(long, default_value_t = 2)]
        attempts: u32,

        /// Output file for the report (JSON)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("infersafe_core=info,infersafe_server=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve {
            port,
            host,
            backend,
            model,
            ollama_url,
            workers,
            batch_size,
            queue_capacity,
            max_workers,
            no_banner,
        } => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(backend) = backend {
                config.backend = backend;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(url) = ollama_url {
                config.ollama_url = url;
            }
            if let Some(workers) = workers {
                config.engine.pool.initial_workers = workers;
            }
            if let Some(size) = batch_size {
                config.engine.queue.batch_size_limit = size;
            }
            if let Some(capacity) = queue_capacity {
                config.engine.queue.capacity = capacity;
            }
            if max_workers.is_some() {
                config.engine.autoscaler.max_workers = max_workers;
            }
            config.print_banner = !no_banner;

            run_server(config).await
        }

        Commands::LoadTest {
            url,
            requests,
            prompt,
            max_tokens,
            sync,
            timeout,
            attempts,
            output,
        } => {
            let config = LoadTestConfig {
                url,
                endpoint: if sync { "/generate" } else { "/generate-batch" }.to_string(),
                requests,
                prompt,
                max_tokens,
                timeout: Duration::from_secs(timeout),
                attempts,
            };

            println!("InferSafe load test");
            println!("Target: {}{}", config.url, config.endpoint);
            println!("Requests: {} concurrent\n", config.requests);

            let report = load_test::run(&config).await?;

            for result in &report.results {
                match &result.outcome {
                    RequestOutcome::Ok { text } => {
                        println!("[{}] ok ({:.0}ms): {}", result.index, result.latency_ms, text.trim())
                    }
                    RequestOutcome::ErrorMarker { text } => {
                        println!("[{}] failed ({:.0}ms): {}", result.index, result.latency_ms, text)
                    }
                    RequestOutcome::Status { code, body } => {
                        println!("[{}] HTTP {}: {}", result.index, code, body)
                    }
                    RequestOutcome::Transport { error } => println!(
                        "[{}] transport error after {} attempt(s): {}",
                        result.index, result.attempts, error
                    ),
                }
            }

            println!();
            println!("=== Summary ===");
            println!("Succeeded: {}/{}", report.succeeded, report.requests);
            println!("Error markers: {}", report.error_markers);
            println!("HTTP errors: {}", report.http_errors);
            println!("Transport errors: {}", report.transport_errors);
            println!("Avg latency: {:.1}ms", report.avg_latency_ms);
            println!("Max latency: {:.1}ms", report.max_latency_ms);
            println!("Total time: {:.1}ms", report.total_time_ms);

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, json)?;
                println!("\nReport saved to: {}", path);
            }

            if !report.all_succeeded() {
                anyhow::bail!(
                    "{} of {} requests did not succeed",
                    report.requests - report.succeeded,
                    report.requests
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "infersafe", "serve", "--port", "9000", "--backend", "ollama", "--workers", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                port,
                backend,
                workers,
                ..
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(backend, Some(BackendKind::Ollama));
                assert_eq!(workers, Some(2));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_load_test_defaults() {
        let cli = Cli::try_parse_from(["infersafe", "load-test"]).unwrap();
        match cli.command {
            Commands::LoadTest {
                url,
                requests,
                max_tokens,
                sync,
                ..
            } => {
                assert_eq!(url, "http://localhost:8000");
                assert_eq!(requests, 10);
                assert_eq!(max_tokens, 20);
                assert!(!sync);
            }
            _ => panic!("expected load-test"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["infersafe", "serve", "--backend", "llamacpp"]).is_err());
    }
}
