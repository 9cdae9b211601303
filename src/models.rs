//! Core data model (spec §3). Plain serde/sqlx value types shared across
//! every component; no behavior lives here beyond small invariant helpers.

use std::cmp::Ordering as CmpOrdering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Principal ─────────────────────────────────────────────────────────────

/// Verified identity, produced by the Authenticator on stream admission.
/// Immutable; lifetime is one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claims: serde_json::Value,
}

impl Principal {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// ── TenantMembership ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Queue priority adjustment (spec §3 QueuedRequest scoring).
    pub fn queue_adjustment(self) -> i64 {
        match self {
            Role::Owner => -10_000,
            Role::Admin => -5_000,
            Role::Member => 0,
            Role::Viewer => 5_000,
        }
    }

    pub fn is_admin_or_above(self) -> bool {
        self >= Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantMembership {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl TenantMembership {
    /// Invariant: only memberships with a non-null `accepted_at` grant access.
    pub fn grants_access(&self) -> bool {
        self.accepted_at.is_some()
    }
}

// ── FilterScope ───────────────────────────────────────────────────────────

/// The `(tenant_id, user_id)` pair bound to a single data-plane operation.
/// Never a process-wide global — always threaded as a parameter (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterScope {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

// ── QueuedRequest ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub endpoint: String,
    pub params: serde_json::Value,
    pub queued_at: DateTime<Utc>,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: QueueStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
}

impl QueuedRequest {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        endpoint: String,
        params: serde_json::Value,
        priority: u8,
        max_retries: u32,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            role,
            endpoint,
            params,
            queued_at: Utc::now(),
            priority: priority.min(100),
            retry_count: 0,
            max_retries,
            status: QueueStatus::Queued,
            result: None,
            error: None,
            idempotency_key,
        }
    }

    /// Queue ordering score (spec §3): lower is dequeued first.
    /// `queued_at + role_adjustment + (-100 * priority)`, measured in
    /// milliseconds since epoch so ties fall back to insertion order.
    pub fn score(&self) -> i64 {
        self.queued_at.timestamp_millis()
            + self.role.queue_adjustment()
            + (-100i64 * self.priority as i64)
    }

    pub fn assert_invariants(&self) {
        debug_assert!(self.retry_count <= self.max_retries);
        debug_assert!(!(self.status == QueueStatus::Completed) || self.result.is_some());
        debug_assert!(!(self.status == QueueStatus::Failed) || self.error.is_some());
    }
}

/// Orders entries for the tenant's priority set: lower score first, ties
/// broken by insertion order (`queued_at`, then `request_id` as a final
/// tiebreaker for total ordering in a `BTreeSet`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub score: i64,
    pub queued_at: DateTime<Utc>,
    pub request_id: Uuid,
}

impl From<&QueuedRequest> for QueueKey {
    fn from(r: &QueuedRequest) -> Self {
        Self {
            score: r.score(),
            queued_at: r.queued_at,
            request_id: r.request_id,
        }
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.queued_at.cmp(&other.queued_at))
            .then_with(|| self.request_id.cmp(&other.request_id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// ── BreakerState (wire-level snapshot; breaker.rs owns the live state) ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub circuit_blocked_count: u64,
    pub current_failure_count: u32,
    pub failure_rate: f64,
    pub opened_at: Option<DateTime<Utc>>,
}

// ── WorkflowState ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Init,
    FetchData,
    ValidateData,
    GenerateEmbeddings,
    RetrieveContext,
    MergeContext,
    GenerateReport,
    Complete,
    ErrorFallback,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Complete | WorkflowState::ErrorFallback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    DataFetched,
    DataCached,
    DataValidated,
    EmbeddingsGenerated,
    ContextRetrieved,
    ContextMerged,
    ReportGenerated,
    Error,
    Timeout,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::DataFetched => "data_fetched",
            Trigger::DataCached => "data_cached",
            Trigger::DataValidated => "data_validated",
            Trigger::EmbeddingsGenerated => "embeddings_generated",
            Trigger::ContextRetrieved => "context_retrieved",
            Trigger::ContextMerged => "context_merged",
            Trigger::ReportGenerated => "report_generated",
            Trigger::Error => "error",
            Trigger::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAudit {
    pub tenant_id: Uuid,
    pub query_id: Uuid,
    pub from_state: WorkflowState,
    pub to_state: WorkflowState,
    pub trigger: Trigger,
    pub data_hash: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

// ── ConnectionInfo ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub tenant_id: Uuid,
    pub endpoint: String,
    pub opened_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownNotice {
    pub message: String,
    pub reconnect_delay_seconds: u64,
}

// ── Citation / Report ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Citation {
    pub source_record_id: String,
    pub property_id: String,
    pub record_date: String,
    pub raw_values: serde_json::Value,
    pub similarity_score: f64,
}

impl Citation {
    pub fn clamp_similarity(&mut self) {
        self.similarity_score = self.similarity_score.clamp(0.0, 1.0);
    }

    fn dedup_key(&self) -> (String, String, String) {
        (
            self.source_record_id.clone(),
            self.property_id.clone(),
            self.record_date.clone(),
        )
    }
}

/// Dedup by `(source_record_id, property_id, record_date)` and clamp scores
/// into `[0,1]` before the citations reach synthesis (SPEC_FULL §11).
pub fn sanitize_citations(mut citations: Vec<Citation>) -> Vec<Citation> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    citations.retain(|c| seen.insert(c.dedup_key()));
    for c in &mut citations {
        c.clamp_similarity();
    }
    citations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    HighConfidence,
    MediumConfidence,
    LowConfidence,
    NoRelevantContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub answer_text: String,
    pub charts: Vec<serde_json::Value>,
    pub metric_cards: Vec<serde_json::Value>,
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub tenant_id: Uuid,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

// ── Orchestrator submission / event wire types (spec §6) ─────────────────

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct QueryRequest {
    pub query: String,
    pub property_id: Option<String>,
    pub dimensions: Option<Vec<String>>,
    pub metrics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Status {
        message: String,
        progress: f64,
    },
    Warning {
        message: String,
    },
    Result {
        payload: Report,
        cached: bool,
        metadata: serde_json::Value,
    },
    Error {
        message: String,
    },
    Shutdown {
        message: String,
        reconnect_delay_seconds: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusEvent {
    pub request_id: Uuid,
    pub position: i64,
    pub total_queue: i64,
    pub eta_seconds: i64,
    pub status: QueueStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_total_order() {
        assert!(Role::Viewer < Role::Member);
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn owner_dequeues_before_viewer_at_same_instant() {
        let now = Utc::now();
        let mut owner = QueuedRequest::new(
            Uuid::nil(),
            Uuid::nil(),
            Role::Owner,
            "fetch".into(),
            serde_json::json!({}),
            50,
            3,
            None,
        );
        owner.queued_at = now;
        let mut viewer = QueuedRequest::new(
            Uuid::nil(),
            Uuid::nil(),
            Role::Viewer,
            "fetch".into(),
            serde_json::json!({}),
            50,
            3,
            None,
        );
        viewer.queued_at = now;

        assert!(owner.score() < viewer.score());
    }

    #[test]
    fn citation_sanitize_dedups_and_clamps() {
        let dup = Citation {
            source_record_id: "r1".into(),
            property_id: "p1".into(),
            record_date: "2025-01-05".into(),
            raw_values: serde_json::json!({}),
            similarity_score: 1.4,
        };
        let out = sanitize_citations(vec![dup.clone(), dup]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].similarity_score, 1.0);
    }
}
