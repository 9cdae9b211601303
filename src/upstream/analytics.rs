// Jaskier Shared Pattern -- analytics upstream client
//! Analytics API client (spec §6 "Worker → upstream analytics API"),
//! grounded in the Python source's GA4 client + `exceptions.py` taxonomy:
//! distinguishes rate-limit (retryable, carries `retry_after`), daily
//! quota exhaustion (not retryable), authentication, and generic upstream
//! failures.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::queue::UpstreamInvoker;

use super::map_status;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsFetchParams {
    pub property_id: String,
    pub date_range: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsFetchResult {
    pub rows: Vec<serde_json::Value>,
    pub dimension_headers: Vec<String>,
    pub metric_headers: Vec<String>,
    #[serde(default)]
    pub cache_hit: bool,
}

pub struct AnalyticsClient {
    http: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl AnalyticsClient {
    pub fn new(http: reqwest::Client, base_url: String, timeout: std::time::Duration) -> Self {
        Self { http, base_url, timeout }
    }

    pub async fn fetch(&self, params: &AnalyticsFetchParams) -> Result<AnalyticsFetchResult, OrchestratorError> {
        let url = format!("{}/v1beta/properties/{}:runReport", self.base_url, params.property_id);
        let resp = self
            .http
            .post(&url)
            .json(params)
            .timeout(self.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        resp.json::<AnalyticsFetchResult>()
            .await
            .map_err(|e| OrchestratorError::UpstreamTransient(format!("malformed response: {e}")))
    }
}

/// Adapts `AnalyticsClient` to the queue's generic invoker interface
/// (`endpoint`/`params` pair) so queued fetch requests can be drained by
/// the worker protocol of spec §4.4 without the queue depending on the
/// concrete analytics client type.
#[async_trait::async_trait]
impl UpstreamInvoker for AnalyticsClient {
    async fn invoke(&self, endpoint: &str, params: &serde_json::Value) -> Result<serde_json::Value, OrchestratorError> {
        if endpoint != "analytics_fetch" {
            return Err(OrchestratorError::BadRequest(format!("unknown endpoint: {endpoint}")));
        }
        let parsed: AnalyticsFetchParams = serde_json::from_value(params.clone())
            .map_err(|e| OrchestratorError::ValidationFailure(e.to_string()))?;
        let result = self.fetch(&parsed).await?;
        serde_json::to_value(result).map_err(|e| OrchestratorError::InternalFailure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_maps_to_rate_limited_kind() {
        let err = map_status(429, "slow down");
        assert!(matches!(err, OrchestratorError::UpstreamRateLimited(_)));
    }

    #[test]
    fn quota_keyword_in_429_body_maps_to_quota_exhausted() {
        let err = map_status(429, "daily quota exceeded");
        assert!(matches!(err, OrchestratorError::UpstreamQuotaExhausted(_)));
    }

    #[test]
    fn auth_status_maps_to_authentication_failure() {
        let err = map_status(401, "invalid token");
        assert!(matches!(err, OrchestratorError::AuthenticationFailure(_)));
    }
}
