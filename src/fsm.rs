// Jaskier Shared Pattern -- workflow fsm
//! Workflow FSM (spec §4.3), grounded in the Python source's
//! `OrchestratorStateMachine` (`orchestrator_state_machine.py`): a constant
//! transition table plus an append-only audit trail, replacing the
//! library-driven dynamic trigger methods the source used (spec §9).

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Trigger, TransitionAudit, WorkflowState};

/// `(source_states, destination)` for every trigger. `error` and `timeout`
/// are valid from any state, including terminal ones, where they are a
/// no-op (decided in SPEC_FULL.md §12 item 1).
fn transition_table(state: WorkflowState, trigger: Trigger) -> Option<WorkflowState> {
    use Trigger::*;
    use WorkflowState::*;

    match (trigger, state) {
        (Start, Init) => Some(FetchData),
        (DataFetched, FetchData) => Some(ValidateData),
        (DataCached, FetchData) => Some(RetrieveContext),
        (DataValidated, ValidateData) => Some(GenerateEmbeddings),
        (EmbeddingsGenerated, GenerateEmbeddings) => Some(RetrieveContext),
        (ContextRetrieved, RetrieveContext) => Some(MergeContext),
        (ContextMerged, MergeContext) => Some(GenerateReport),
        (ReportGenerated, GenerateReport) => Some(Complete),
        (Error, _) | (Timeout, _) => Some(ErrorFallback),
        _ => None,
    }
}

/// Stable digest over the sorted transition payload, enabling replay
/// verification (spec §3 `TransitionAudit.data_hash`).
fn data_hash(tenant_id: Uuid, query_id: Uuid, from: WorkflowState, to: WorkflowState, trigger: Trigger) -> String {
    let payload = serde_json::json!({
        "from": format!("{from:?}"),
        "query_id": query_id,
        "tenant_id": tenant_id,
        "to": format!("{to:?}"),
        "trigger": trigger.as_str(),
    });
    let canonical = serde_json::to_string(&payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One query's FSM. Single-reader/single-writer for its owning query
/// (spec §5) — not shared across tasks without external synchronization.
pub struct WorkflowFsm {
    tenant_id: Uuid,
    query_id: Uuid,
    state: WorkflowState,
    audit_trail: Vec<TransitionAudit>,
    last_transition_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowFsm {
    pub fn new(tenant_id: Uuid, query_id: Uuid) -> Self {
        Self {
            tenant_id,
            query_id,
            state: WorkflowState::Init,
            audit_trail: Vec::new(),
            last_transition_at: chrono::Utc::now(),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn audit_trail(&self) -> &[TransitionAudit] {
        &self.audit_trail
    }

    /// Fires `trigger`. A trigger not in the current state's outgoing set
    /// (and not `error`/`timeout`) is rejected and automatically re-fires
    /// `error` (spec §4.3: "Any transition not listed is rejected;
    /// attempting one fires `error` automatically").
    pub fn fire(&mut self, trigger: Trigger) -> WorkflowState {
        if self.state.is_terminal() && matches!(trigger, Trigger::Error | Trigger::Timeout) {
            tracing::debug!(
                query_id = %self.query_id,
                state = ?self.state,
                trigger = trigger.as_str(),
                "ignoring trigger from terminal state"
            );
            return self.state;
        }

        match transition_table(self.state, trigger) {
            Some(to) => {
                self.record(trigger, to, None);
                to
            }
            None => {
                let to = WorkflowState::ErrorFallback;
                self.record(
                    trigger,
                    to,
                    Some(format!(
                        "trigger {} not valid from state {:?}",
                        trigger.as_str(),
                        self.state
                    )),
                );
                to
            }
        }
    }

    fn record(&mut self, trigger: Trigger, to: WorkflowState, error: Option<String>) {
        let now = chrono::Utc::now();
        let duration_ms = (now - self.last_transition_at).num_milliseconds();
        let hash = data_hash(self.tenant_id, self.query_id, self.state, to, trigger);

        let record = TransitionAudit {
            tenant_id: self.tenant_id,
            query_id: self.query_id,
            from_state: self.state,
            to_state: to,
            trigger,
            data_hash: hash,
            timestamp: now,
            duration_ms,
            error: error.clone(),
        };

        if let Some(ref msg) = error {
            tracing::warn!(query_id = %self.query_id, from = ?self.state, trigger = trigger.as_str(), "fsm rejected transition: {msg}");
        } else {
            tracing::info!(query_id = %self.query_id, from = ?self.state, to = ?to, trigger = trigger.as_str(), "fsm transition");
        }

        self.state = to;
        self.last_transition_at = now;
        self.audit_trail.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_complete() {
        let mut fsm = WorkflowFsm::new(Uuid::nil(), Uuid::nil());
        fsm.fire(Trigger::Start);
        fsm.fire(Trigger::DataFetched);
        fsm.fire(Trigger::DataValidated);
        fsm.fire(Trigger::EmbeddingsGenerated);
        fsm.fire(Trigger::ContextRetrieved);
        fsm.fire(Trigger::ContextMerged);
        let end = fsm.fire(Trigger::ReportGenerated);

        assert_eq!(end, WorkflowState::Complete);
        assert_eq!(fsm.audit_trail().len(), 7);
        assert!(fsm.audit_trail().iter().all(|a| a.error.is_none()));
    }

    #[test]
    fn cache_branch_skips_validation_and_embeddings() {
        let mut fsm = WorkflowFsm::new(Uuid::nil(), Uuid::nil());
        fsm.fire(Trigger::Start);
        let to = fsm.fire(Trigger::DataCached);
        assert_eq!(to, WorkflowState::RetrieveContext);
    }

    #[test]
    fn illegal_trigger_forces_error_fallback_with_audit_record() {
        let mut fsm = WorkflowFsm::new(Uuid::nil(), Uuid::nil());
        fsm.fire(Trigger::Start);
        let to = fsm.fire(Trigger::ReportGenerated);
        assert_eq!(to, WorkflowState::ErrorFallback);
        let last = fsm.audit_trail().last().unwrap();
        assert!(last.error.is_some());
    }

    #[test]
    fn terminal_state_ignores_further_error_triggers() {
        let mut fsm = WorkflowFsm::new(Uuid::nil(), Uuid::nil());
        fsm.fire(Trigger::Error);
        let trail_len_before = fsm.audit_trail().len();
        let state = fsm.fire(Trigger::Error);
        assert_eq!(state, WorkflowState::ErrorFallback);
        assert_eq!(fsm.audit_trail().len(), trail_len_before);
    }

    #[test]
    fn data_hash_is_deterministic_for_same_inputs() {
        let id = Uuid::nil();
        let h1 = data_hash(id, id, WorkflowState::Init, WorkflowState::FetchData, Trigger::Start);
        let h2 = data_hash(id, id, WorkflowState::Init, WorkflowState::FetchData, Trigger::Start);
        assert_eq!(h1, h2);
    }
}
