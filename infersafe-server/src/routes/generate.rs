//! Generation routes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

/// Token budget when the caller does not give one
pub const DEFAULT_MAX_TOKENS: u32 = 128;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// Body of `/generate` and `/generate-batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Liveness banner
///
/// GET /
pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "InferSafe is up!" }))
}

/// Queue a request and stream its outcome as plain text
///
/// POST /generate-batch
///
/// Always answers 200; failures are streamed as an `Error: ...` line.
pub async fn generate_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    debug!(max_tokens = request.max_tokens, "Handling POST /generate-batch");

    let stream = state
        .engine
        .submit_streaming(request.prompt, request.max_tokens)
        .await
        .map(Ok::<_, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Dispatch one request immediately, bypassing the queue
///
/// POST /generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<String, ApiError> {
    info!(max_tokens = request.max_tokens, "Handling POST /generate");

    let text = state
        .engine
        .run_single(request.prompt, request.max_tokens)
        .await?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_tokens_default() {
        let request: GenerateRequest = serde_json::from_str(r#"{"prompt": "hello"}"#).unwrap();
        assert_eq!(request.max_tokens, 128);

        let request: GenerateRequest =
            serde_json::from_str(r#"{"prompt": "hello", "max_tokens": 20}"#).unwrap();
        assert_eq!(request.max_tokens, 20);
    }

    #[test]
    fn test_prompt_required() {
        assert!(serde_json::from_str::<GenerateRequest>(r#"{"max_tokens": 20}"#).is_err());
    }
}
