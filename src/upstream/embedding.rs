// Jaskier Shared Pattern -- embedding upstream client
//! Embedding service client (spec §6 "Worker → embedding service"),
//! grounded in the Python source's `embedding/validator.py`: the service
//! must return a fixed dimension for every call, and NaN/all-zero/
//! mismatched-dimension vectors are a `ValidationFailure`, not a silent
//! pass-through.

use crate::error::OrchestratorError;

pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
    expected_dimension: usize,
}

impl EmbeddingClient {
    pub fn new(http: reqwest::Client, base_url: String, timeout: std::time::Duration, expected_dimension: usize) -> Self {
        Self {
            http,
            base_url,
            timeout,
            expected_dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, OrchestratorError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "input": [text] }))
            .timeout(self.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(super::map_status(status, &body));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| OrchestratorError::UpstreamTransient(format!("malformed response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::ValidationFailure("empty embedding response".to_string()))?
            .embedding;

        validate_embedding(&vector, self.expected_dimension)?;
        Ok(vector)
    }
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Enforces spec §6's "mismatched dimensions are treated as a validation
/// failure", supplemented with the NaN/all-zero checks from the Python
/// source's validator.
pub fn validate_embedding(vector: &[f32], expected_dimension: usize) -> Result<(), OrchestratorError> {
    if vector.len() != expected_dimension {
        return Err(OrchestratorError::ValidationFailure(format!(
            "embedding dimension mismatch: expected {}, got {}",
            expected_dimension,
            vector.len()
        )));
    }
    if vector.iter().any(|v| v.is_nan()) {
        return Err(OrchestratorError::ValidationFailure("embedding contains NaN".to_string()));
    }
    if vector.iter().all(|v| *v == 0.0) {
        return Err(OrchestratorError::ValidationFailure("embedding is all-zero".to_string()));
    }
    Ok(())
}
