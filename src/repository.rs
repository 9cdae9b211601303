// Jaskier Shared Pattern -- repository
//! Repository contract (spec §6 "Orchestrator → repository") and its sqlx
//! Postgres implementation. Vector similarity search and the relational
//! store are explicitly out of scope per spec.md §1 ("abstracted as a
//! repository with a tenant-filtered query surface") — this module is the
//! thin adapter the orchestrator depends on, in the teacher's sqlx style
//! (`handlers.rs`/`audit.rs` query conventions).

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::gate::MembershipLookup;
use crate::models::{Citation, ConfidenceLabel, FilterScope, Report, TenantMembership};

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub citations: Vec<Citation>,
    pub average_similarity: f64,
    pub status_label: ConfidenceLabel,
}

/// Every read path accepts a bound `FilterScope` and is trusted to filter
/// server-side — the core does no post-filtering except in tests (spec
/// §4.6 repository contract).
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn top_k_similar(
        &self,
        embedding: &[f32],
        k: usize,
        min_similarity: f64,
        scope: FilterScope,
        confidence_thresholds: (f64, f64, f64),
    ) -> Result<RetrievalResult, OrchestratorError>;

    async fn lookup_cached_report(
        &self,
        query: &str,
        tenant_id: Uuid,
        property_id: Option<&str>,
    ) -> Result<Option<Report>, OrchestratorError>;

    async fn store_cached_report(
        &self,
        tenant_id: Uuid,
        property_id: Option<&str>,
        report: &Report,
    ) -> Result<(), OrchestratorError>;

    /// Persists a freshly-computed embedding for fetched tabular data
    /// (spec §4.7 step 7 "conditional embedding persistence"). Called from
    /// a detached background task; failures are logged by the caller and
    /// never surfaced to the client.
    async fn store_embedding(
        &self,
        tenant_id: Uuid,
        property_id: Option<&str>,
        source_record_id: &str,
        record_date: &str,
        raw_values: &Value,
        embedding: &[f32],
    ) -> Result<(), OrchestratorError>;
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn label_for(average_similarity: f64, thresholds: (f64, f64, f64)) -> ConfidenceLabel {
    let (high, medium, low) = thresholds;
    if average_similarity >= high {
        ConfidenceLabel::HighConfidence
    } else if average_similarity >= medium {
        ConfidenceLabel::MediumConfidence
    } else if average_similarity >= low {
        ConfidenceLabel::LowConfidence
    } else {
        ConfidenceLabel::NoRelevantContext
    }
}

#[async_trait::async_trait]
impl Repository for PgRepository {
    async fn top_k_similar(
        &self,
        embedding: &[f32],
        k: usize,
        min_similarity: f64,
        scope: FilterScope,
        confidence_thresholds: (f64, f64, f64),
    ) -> Result<RetrievalResult, OrchestratorError> {
        if scope.tenant_id.is_nil() || scope.user_id.is_nil() {
            return Err(OrchestratorError::ValidationFailure(
                "filter scope must have both tenant_id and user_id set".to_string(),
            ));
        }

        // Vector similarity itself is out of scope (spec.md §1) — rows already
        // carry a precomputed `similarity_score`, so `embedding` only proves
        // the caller has one; the query filters and ranks on the stored score.
        let _ = embedding;

        let rows = sqlx::query_as::<_, (String, String, String, serde_json::Value, f64)>(
            "SELECT source_record_id, property_id, record_date, raw_values, similarity_score \
             FROM embedding_records \
             WHERE tenant_id = $1 AND similarity_score >= $2 \
             ORDER BY similarity_score DESC LIMIT $3",
        )
        .bind(scope.tenant_id)
        .bind(min_similarity)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut citations: Vec<Citation> = rows
            .into_iter()
            .map(
                |(source_record_id, property_id, record_date, raw_values, similarity_score)| Citation {
                    source_record_id,
                    property_id,
                    record_date,
                    raw_values,
                    similarity_score,
                },
            )
            .collect();
        citations = crate::models::sanitize_citations(citations);

        let average_similarity = if citations.is_empty() {
            0.0
        } else {
            citations.iter().map(|c| c.similarity_score).sum::<f64>() / citations.len() as f64
        };

        Ok(RetrievalResult {
            status_label: label_for(average_similarity, confidence_thresholds),
            average_similarity,
            citations,
        })
    }

    async fn lookup_cached_report(
        &self,
        query: &str,
        tenant_id: Uuid,
        property_id: Option<&str>,
    ) -> Result<Option<Report>, OrchestratorError> {
        let row = sqlx::query_as::<_, (String, serde_json::Value, serde_json::Value, serde_json::Value, f64, chrono::DateTime<chrono::Utc>)>(
            "SELECT answer_text, charts, metric_cards, citations, confidence, created_at \
             FROM cached_reports \
             WHERE tenant_id = $1 AND query = $2 AND property_id IS NOT DISTINCT FROM $3 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(query)
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((answer_text, charts, metric_cards, citations, confidence, created_at)) = row else {
            return Ok(None);
        };

        let citations: Vec<Citation> = serde_json::from_value(citations).unwrap_or_default();
        let charts: Vec<serde_json::Value> = serde_json::from_value(charts).unwrap_or_default();
        let metric_cards: Vec<serde_json::Value> = serde_json::from_value(metric_cards).unwrap_or_default();

        Ok(Some(Report {
            answer_text,
            charts,
            metric_cards,
            citations,
            confidence,
            tenant_id,
            query: query.to_string(),
            timestamp: created_at,
        }))
    }

    async fn store_cached_report(
        &self,
        tenant_id: Uuid,
        property_id: Option<&str>,
        report: &Report,
    ) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO cached_reports (tenant_id, query, property_id, answer_text, charts, metric_cards, citations, confidence, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(tenant_id)
        .bind(&report.query)
        .bind(property_id)
        .bind(&report.answer_text)
        .bind(serde_json::to_value(&report.charts).unwrap_or_default())
        .bind(serde_json::to_value(&report.metric_cards).unwrap_or_default())
        .bind(serde_json::to_value(&report.citations).unwrap_or_default())
        .bind(report.confidence)
        .bind(report.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_embedding(
        &self,
        tenant_id: Uuid,
        property_id: Option<&str>,
        source_record_id: &str,
        record_date: &str,
        raw_values: &Value,
        embedding: &[f32],
    ) -> Result<(), OrchestratorError> {
        let embedding_json = serde_json::to_value(embedding)
            .map_err(|e| OrchestratorError::InternalFailure(e.to_string()))?;
        sqlx::query(
            "INSERT INTO embedding_records \
             (tenant_id, property_id, source_record_id, record_date, raw_values, embedding, embedding_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(tenant_id)
        .bind(property_id)
        .bind(source_record_id)
        .bind(record_date)
        .bind(raw_values)
        .bind(&embedding_json)
        .bind(1i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MembershipLookup for PgRepository {
    async fn membership(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Option<TenantMembership>, OrchestratorError> {
        let row = sqlx::query_as::<_, TenantMembership>(
            "SELECT user_id, tenant_id, role, accepted_at FROM tenant_memberships WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_label_matches_threshold_bands() {
        let thresholds = (0.85, 0.70, 0.50);
        assert_eq!(label_for(0.92, thresholds), ConfidenceLabel::HighConfidence);
        assert_eq!(label_for(0.72, thresholds), ConfidenceLabel::MediumConfidence);
        assert_eq!(label_for(0.55, thresholds), ConfidenceLabel::LowConfidence);
        assert_eq!(label_for(0.10, thresholds), ConfidenceLabel::NoRelevantContext);
    }
}
