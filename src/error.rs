// Jaskier Shared Pattern -- error
//! Centralized error type for the orchestration core.
//!
//! Every fallible operation in `breaker`, `executor`, `fsm`, `queue`,
//! `registrar`, `gate`, `repository`, `upstream` and `orchestrator` returns
//! `Result<T, OrchestratorError>`. Handlers convert this into a sanitized
//! JSON response; library code propagates it with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("not authorized for tenant: {0}")]
    AuthorizationFailure(String),

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("upstream quota exhausted: {0}")]
    UpstreamQuotaExhausted(String),

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("circuit breaker open for {name}, reopens at {reopens_at}")]
    BreakerOpen {
        name: String,
        failure_count: u32,
        reopens_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("repository failure: {0}")]
    RepositoryFailure(String),

    #[error("operation cancelled")]
    Cancellation,

    #[error("internal error: {0}")]
    InternalFailure(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl OrchestratorError {
    /// Structured error code string for programmatic consumption.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestratorError::AuthenticationFailure(_) => "AUTHENTICATION_FAILURE",
            OrchestratorError::AuthorizationFailure(_) => "AUTHORIZATION_FAILURE",
            OrchestratorError::UpstreamRateLimited(_) => "UPSTREAM_RATE_LIMITED",
            OrchestratorError::UpstreamQuotaExhausted(_) => "UPSTREAM_QUOTA_EXHAUSTED",
            OrchestratorError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            OrchestratorError::Timeout(_) => "TIMEOUT",
            OrchestratorError::BreakerOpen { .. } => "CIRCUIT_OPEN",
            OrchestratorError::ValidationFailure(_) => "VALIDATION_FAILURE",
            OrchestratorError::RepositoryFailure(_) => "REPOSITORY_FAILURE",
            OrchestratorError::Cancellation => "CANCELLED",
            OrchestratorError::InternalFailure(_) => "INTERNAL_ERROR",
            OrchestratorError::BadRequest(_) => "BAD_REQUEST",
            OrchestratorError::NotFound(_) => "NOT_FOUND",
            OrchestratorError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// `true` for error kinds the executor/worker should count as a
    /// circuit-breaker failure (spec §4.1 failure semantics).
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(self, OrchestratorError::BreakerOpen { .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            OrchestratorError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            OrchestratorError::AuthorizationFailure(_) => StatusCode::FORBIDDEN,
            OrchestratorError::UpstreamRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            OrchestratorError::UpstreamQuotaExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            OrchestratorError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::RepositoryFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Cancellation => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::InternalFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            "orchestrator error ({}): {} [request_id={}]",
            status.as_u16(),
            self,
            request_id
        );

        let mut body = json!({
            "error": self.to_string(),
            "error_code": self.error_code(),
            "request_id": request_id,
        });

        if status == StatusCode::SERVICE_UNAVAILABLE {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("retry_after".into(), json!(30));
            }
        }

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("30"));
        }
        response
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(e: sqlx::Error) -> Self {
        OrchestratorError::RepositoryFailure(e.to_string())
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OrchestratorError::UpstreamTransient(format!("timeout: {e}"))
        } else {
            OrchestratorError::UpstreamTransient(e.to_string())
        }
    }
}
