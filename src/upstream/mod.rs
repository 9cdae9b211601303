// Jaskier Shared Pattern -- upstream clients
//! Fallible RPC clients for the two upstream collaborators spec.md treats
//! as external (§1): the analytics API and the embedding service. Error
//! mapping follows the Python source's `ga4/exceptions.py` taxonomy,
//! supplemented per SPEC_FULL.md §11.

pub mod analytics;
pub mod embedding;

pub use analytics::AnalyticsClient;
pub use embedding::EmbeddingClient;

/// Maps an upstream HTTP status into an `OrchestratorError` kind, per
/// `original_source/.../ga4/exceptions.py`'s status-to-exception table.
pub(crate) fn map_status(status: u16, body: &str) -> crate::error::OrchestratorError {
    use crate::error::OrchestratorError::*;
    match status {
        401 | 403 => AuthenticationFailure(format!("upstream rejected credentials: {body}")),
        429 => {
            if body.to_lowercase().contains("quota") {
                UpstreamQuotaExhausted(body.to_string())
            } else {
                UpstreamRateLimited(body.to_string())
            }
        }
        400..=499 => UpstreamTransient(format!("upstream {status}: {body}")),
        _ => UpstreamTransient(format!("upstream {status}: {body}")),
    }
}
