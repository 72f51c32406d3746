//! Error types for the InferSafe server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use infersafe_core::error::InferenceError;
use serde_json::json;

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request resolved to a failure
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Inference(err) => match err {
                InferenceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                InferenceError::QueueFull { .. } | InferenceError::Shutdown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                InferenceError::CallerTimeout { .. } | InferenceError::AttemptTimeout { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                InferenceError::RetriesExhausted { .. } | InferenceError::Backend(_) => {
                    StatusCode::BAD_GATEWAY
                }
                InferenceError::NoWorkers | InferenceError::Aborted => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Inference(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        }));

        (self.status(), body).into_response()
    }
}
