//! Health check and metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::metrics::encode_metrics;
use crate::state::AppState;

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workers = state.engine.pool_size().await;
    let shutting_down = state.engine.is_shutting_down();
    let status = if workers > 0 && !shutting_down {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "unhealthy" },
            "backend": state.config.backend.to_string(),
            "workers": workers,
            "uptime_secs": state.uptime().as_secs(),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Pool, queue and dispatch statistics
///
/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let engine_config = state.engine.config();

    Json(json!({
        "pool": {
            "workers": state.engine.workers().await,
            "total_in_flight": state.engine.total_in_flight().await,
            "min_workers": engine_config.autoscaler.min_workers,
            "max_workers": engine_config.autoscaler.max_workers,
        },
        "queue": {
            "length": state.engine.queue_len().await,
            "capacity": engine_config.queue.capacity,
            "batch_size_limit": engine_config.queue.batch_size_limit,
            "caller_timeout_secs": state.engine.caller_timeout().await.as_secs_f64(),
        },
        "dispatch": {
            "attempt_timeout_secs": engine_config.dispatch.attempt_timeout.as_secs_f64(),
            "max_retries": engine_config.dispatch.max_retries,
        },
        "totals": snapshot,
    }))
}

/// Prometheus scrape endpoint
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Gauges are otherwise only refreshed on autoscaler ticks
    crate::metrics::prometheus::IN_FLIGHT.set(state.engine.total_in_flight().await as i64);
    crate::metrics::prometheus::WORKERS.set(state.engine.pool_size().await as i64);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

/// Ready check (for Kubernetes)
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.engine.pool_size().await > 0 && !state.engine.is_shutting_down() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
