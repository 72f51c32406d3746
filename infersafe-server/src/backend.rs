//! Inference backends the server can front.
//!
//! `mock` runs entirely in-process. `ollama` forwards each generation to an
//! Ollama server's `/api/generate` endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infersafe_core::backend::{BackendFactory, InferenceBackend, MockFactory};
use infersafe_core::error::BackendError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::state::{BackendKind, ServerConfig};

/// Body of an Ollama `/api/generate` call
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: i64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// One Ollama model behind an HTTP client
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn post(&self, request: &GenerateRequest<'_>) -> Result<String, String> {
        let response = self
            .client
            .post(self.generate_url())
            .json(request)
            .send()
            .await
            .map_err(|e| format!("Failed to connect to Ollama: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Ollama returned status {}: {}", status, body));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid Ollama response: {}", e))?;
        Ok(result.response)
    }

    /// Ask Ollama to load the model into memory (empty prompt)
    #[instrument(skip(self), fields(model = %self.model))]
    async fn preload(&self) -> Result<(), BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            options: None,
        };
        self.post(&request).await.map_err(|e| {
            error!(error = %e, "Failed to load model");
            BackendError::load(e)
        })?;
        info!("Model loaded");
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: Some(GenerateOptions {
                num_predict: i64::from(max_tokens),
            }),
        };
        debug!(url = %self.generate_url(), "Sending generate request");
        self.post(&request).await.map_err(BackendError::generation)
    }

    fn describe(&self) -> String {
        format!("ollama:{}@{}", self.model, self.base_url)
    }
}

/// Builds [`OllamaBackend`]s, preloading the model on each one
pub struct OllamaFactory {
    base_url: String,
    model: String,
    request_timeout: Duration,
}

impl OllamaFactory {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            // Long generations on CPU can take minutes
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl BackendFactory for OllamaFactory {
    async fn create(&self) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| BackendError::load(format!("Failed to create HTTP client: {}", e)))?;

        let backend = OllamaBackend {
            client,
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        };
        backend.preload().await?;
        Ok(Arc::new(backend))
    }

    fn describe(&self) -> String {
        format!("ollama:{}@{}", self.model, self.base_url)
    }
}

/// Backend factory selected by `config.backend`
pub fn build_factory(config: &ServerConfig) -> Arc<dyn BackendFactory> {
    match config.backend {
        BackendKind::Mock => Arc::new(MockFactory::responding(config.mock_response.clone())),
        BackendKind::Ollama => Arc::new(
            OllamaFactory::new(&config.ollama_url, &config.model)
                .with_request_timeout(config.backend_request_timeout),
        ),
    }
}
