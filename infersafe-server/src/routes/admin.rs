//! Model management routes.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use infersafe_core::engine::RELOAD_OK;
use tracing::info;

use crate::metrics::set_backend_healthy;
use crate::state::AppState;

/// Rebuild every worker's backend from the configured model
///
/// POST /reload-model
pub async fn reload_model(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!(backend = %state.config.backend, model = %state.config.model, "Handling POST /reload-model");

    match state.engine.reload().await {
        Ok(_) => {
            set_backend_healthy(true);
            (StatusCode::OK, RELOAD_OK.to_string())
        }
        Err(e) => {
            set_backend_healthy(false);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to reload model: {}", e),
            )
        }
    }
}
