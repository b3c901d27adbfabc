//! # Inference Service
//!
//! Predictions are delegated to an external service. The orchestrator only
//! sees the [`InferenceService`] trait; [`HttpInferenceClient`] speaks to
//! a JSON-over-HTTP service:
//!
//! - `POST {base}/predict` with `{"model": ..., "input": ...}`
//! - `GET {base}/health`

use async_trait::async_trait;
use meshwork_core::MeshError;
use serde_json::{Value, json};
use std::time::Duration;

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Called once during orchestrator startup.
    async fn start(&self) -> Result<(), MeshError> {
        Ok(())
    }

    async fn predict(&self, model: &str, input: Value) -> Result<Value, MeshError>;

    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpInferenceClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn start(&self) -> Result<(), MeshError> {
        if !self.is_healthy().await {
            tracing::warn!(base_url = %self.base_url, "Inference service not reachable yet");
        }
        Ok(())
    }

    async fn predict(&self, model: &str, input: Value) -> Result<Value, MeshError> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "model": model, "input": input }))
            .send()
            .await
            .map_err(|e| MeshError::InferenceError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::InferenceError(format!(
                "inference service returned {}",
                status.as_u16()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| MeshError::InferenceError(format!("invalid response: {}", e)))
    }

    async fn is_healthy(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
