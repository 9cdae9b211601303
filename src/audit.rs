// Jaskier Shared Pattern — audit
//! Fire-and-forget audit log — persists FSM transitions, authorization
//! failures, and shutdown events (SPEC_FULL §10.7). Errors are logged but
//! never propagated; audit must not break the main request flow.

use uuid::Uuid;

pub async fn log_audit(pool: &sqlx::PgPool, action: &str, details: serde_json::Value, tenant_id: Option<Uuid>) {
    if let Err(e) = sqlx::query(
        "INSERT INTO ch_audit_log (action, details, tenant_id) VALUES ($1, $2, $3)",
    )
    .bind(action)
    .bind(&details)
    .bind(tenant_id)
    .execute(pool)
    .await
    {
        tracing::warn!("audit: failed to log action={}: {}", action, e);
    }
}

/// Persists one FSM transition record (spec §4.3 "audit records emitted
/// unconditionally after each transition").
pub async fn log_transition(pool: &sqlx::PgPool, audit: &crate::models::TransitionAudit) {
    let details = serde_json::json!({
        "query_id": audit.query_id,
        "from_state": audit.from_state,
        "to_state": audit.to_state,
        "trigger": audit.trigger.as_str(),
        "data_hash": audit.data_hash,
        "duration_ms": audit.duration_ms,
        "error": audit.error,
    });
    log_audit(pool, "fsm_transition", details, Some(audit.tenant_id)).await;
}
