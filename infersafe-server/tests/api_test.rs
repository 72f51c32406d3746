//! End-to-end HTTP tests for the InferSafe server
//!
//! Each test starts the full stack (engine, router) with the mock backend on
//! an ephemeral port and talks to it over real HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use infersafe_server::{build_router, AppState, BackendKind, ServerConfig};
use serde_json::{json, Value};

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            backend: BackendKind::Mock,
            mock_response: "mock response".to_string(),
            print_banner: false,
            ..ServerConfig::default()
        };
        config.engine.queue.cut_interval = Duration::from_millis(10);

        let state = Arc::new(AppState::new(config).await.unwrap());
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

#[tokio::test]
async fn test_root() {
    let server = TestServer::start().await;
    let body: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "message": "InferSafe is up!" }));
}

#[tokio::test]
async fn test_generate_batch_streams_mock_response() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/generate-batch"))
        .json(&json!({ "prompt": "hello", "max_tokens": 20 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let text = response.text().await.unwrap();
    assert_eq!(text, "mock response ");
}

#[tokio::test]
async fn test_generate_sync() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/generate"))
        .json(&json!({ "prompt": "hello", "max_tokens": 20 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "mock response");
}

#[tokio::test]
async fn test_zero_budget() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/generate"))
        .json(&json!({ "prompt": "hello", "max_tokens": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "InvalidRequestError");

    // The streamed route reports failures inline
    let response = server
        .client
        .post(server.url("/generate-batch"))
        .json(&json!({ "prompt": "hello", "max_tokens": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert!(text.starts_with("Error: InvalidRequestError: "), "got {}", text);
}

#[tokio::test]
async fn test_empty_prompt_accepted_by_both_routes() {
    let server = TestServer::start().await;

    for path in ["/generate", "/generate-batch"] {
        let response = server
            .client
            .post(server.url(path))
            .json(&json!({ "prompt": "", "max_tokens": 8 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{}", path);
        let text = response.text().await.unwrap();
        assert!(text.starts_with("mock"), "{}: got {}", path, text);
    }
}

#[tokio::test]
async fn test_concurrent_batch_requests() {
    let server = TestServer::start().await;

    let requests = (0..10).map(|i| {
        server
            .client
            .post(server.url("/generate-batch"))
            .json(&json!({ "prompt": format!("Write me a haiku about autumn {}", i), "max_tokens": 20 }))
            .send()
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "mock response ");
    }

    let snapshot = server.state.metrics.snapshot();
    assert_eq!(snapshot.requests_succeeded, 10);
    assert!(snapshot.batches_processed >= 1);
}

#[tokio::test]
async fn test_reload_model() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/reload-model"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Model reloaded successfully");
    assert_eq!(server.state.engine.pool_size().await, 3);
}

#[tokio::test]
async fn test_health_endpoints() {
    let server = TestServer::start().await;

    for path in ["/health", "/ready", "/live"] {
        let response = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 200, "{}", path);
    }

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["workers"], 3);
}

#[tokio::test]
async fn test_stats_and_metrics() {
    let server = TestServer::start().await;
    server
        .client
        .post(server.url("/generate"))
        .json(&json!({ "prompt": "hello" }))
        .send()
        .await
        .unwrap();

    let stats: Value = server
        .client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["pool"]["workers"].as_array().unwrap().len(), 3);
    assert_eq!(stats["pool"]["workers"][0]["name"], "worker_0");
    assert_eq!(stats["queue"]["capacity"], 100);
    assert_eq!(stats["totals"]["requests_succeeded"], 1);

    infersafe_server::metrics::init_metrics();
    let metrics = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("infersafe_workers"));
}

#[tokio::test]
async fn test_shutdown_marks_unready() {
    let server = TestServer::start().await;
    server.state.engine.shutdown().await;

    let response = server.client.get(server.url("/ready")).send().await.unwrap();
    assert_eq!(response.status(), 503);
}
