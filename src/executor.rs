// Jaskier Shared Pattern -- parallel executor
//! Parallel executor (spec §4.2), grounded in the Python source's
//! `ParallelAgentExecutor.execute_parallel_safe` (`parallel_executor.py`):
//! runs named workers concurrently, each through its own breaker with a
//! per-call timeout, and returns a complete outcome map — never a partial
//! one, and one failure never silently cancels the batch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::breaker::CircuitBreakerRegistry;
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Timeout,
    CircuitOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// One named unit of work (spec §9: "common request context plus a worker
/// interface `{name, execute(ctx, input) → output}`", replacing the
/// Python source's base-class agent inheritance).
pub type WorkerFn = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, OrchestratorError>> + Send>>
        + Send,
>;

pub struct Worker {
    pub name: String,
    pub call: WorkerFn,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLog {
    pub execution_id: Uuid,
    pub tenant_id: Uuid,
    pub workers: Vec<String>,
    pub total_duration_ms: i64,
    pub success_count: usize,
    pub failed_count: usize,
    pub circuit_blocked_count: usize,
}

pub struct ParallelExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ParallelExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }

    /// Runs `workers` concurrently with `timeout` applied per worker.
    ///
    /// If `rollback_on_any_failure` is set, the first non-success outcome
    /// cancels the remaining in-flight workers cooperatively via a shared
    /// `CancellationToken`; every worker's outcome is still collected.
    pub async fn run_parallel(
        &self,
        workers: Vec<Worker>,
        timeout: Duration,
        tenant_id: Uuid,
        rollback_on_any_failure: bool,
        breakers_enabled: bool,
    ) -> (HashMap<String, Outcome>, ExecutionLog) {
        let execution_id = Uuid::new_v4();
        let names: Vec<String> = workers.iter().map(|w| w.name.clone()).collect();
        let batch_start = Utc::now();
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            let breaker = breakers_enabled.then(|| self.breakers.get_or_create(&worker.name));
            let cancel_child = cancel.clone();
            let name = worker.name.clone();

            handles.push(tokio::spawn(async move {
                let started_at = Utc::now();
                let call = worker.call;

                let timed_call = |cancel: CancellationToken| async move {
                    match tokio::time::timeout(timeout, call(cancel)).await {
                        Ok(result) => result,
                        Err(_elapsed) => Err(OrchestratorError::Timeout("worker timed out".to_string())),
                    }
                };

                let exec = async move {
                    if let Some(breaker) = breaker {
                        breaker
                            .call(|| timed_call(cancel_child.clone()))
                            .await
                    } else {
                        timed_call(cancel_child.clone()).await
                    }
                };

                let outcome = match exec.await {
                    Ok(value) => Outcome {
                        status: OutcomeStatus::Success,
                        result: Some(value),
                        error: None,
                        duration_ms: 0,
                        started_at,
                        completed_at: Utc::now(),
                    },
                    Err(OrchestratorError::BreakerOpen { .. }) => Outcome {
                        status: OutcomeStatus::CircuitOpen,
                        result: None,
                        error: Some("circuit open".to_string()),
                        duration_ms: 0,
                        started_at,
                        completed_at: Utc::now(),
                    },
                    Err(OrchestratorError::Timeout(msg)) => Outcome {
                        status: OutcomeStatus::Timeout,
                        result: None,
                        error: Some(msg),
                        duration_ms: 0,
                        started_at,
                        completed_at: Utc::now(),
                    },
                    Err(e) => Outcome {
                        status: OutcomeStatus::Failed,
                        result: None,
                        error: Some(e.to_string()),
                        duration_ms: 0,
                        started_at,
                        completed_at: Utc::now(),
                    },
                };

                (name, outcome)
            }));
        }

        let mut outcomes = HashMap::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((name, mut outcome)) => {
                    outcome.duration_ms =
                        (outcome.completed_at - outcome.started_at).num_milliseconds();
                    if rollback_on_any_failure && outcome.status != OutcomeStatus::Success {
                        cancel.cancel();
                    }
                    outcomes.insert(name, outcome);
                }
                Err(join_err) => {
                    tracing::error!("worker task panicked: {join_err}");
                }
            }
        }

        let success_count = outcomes
            .values()
            .filter(|o| o.status == OutcomeStatus::Success)
            .count();
        let failed_count = outcomes
            .values()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed | OutcomeStatus::Timeout))
            .count();
        let circuit_blocked_count = outcomes
            .values()
            .filter(|o| o.status == OutcomeStatus::CircuitOpen)
            .count();

        let log = ExecutionLog {
            execution_id,
            tenant_id,
            workers: names,
            total_duration_ms: (Utc::now() - batch_start).num_milliseconds(),
            success_count,
            failed_count,
            circuit_blocked_count,
        };
        tracing::info!(
            execution_id = %log.execution_id,
            tenant_id = %tenant_id,
            success = log.success_count,
            failed = log.failed_count,
            blocked = log.circuit_blocked_count,
            "parallel batch complete"
        );

        (outcomes, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str, outcome: Result<serde_json::Value, OrchestratorError>) -> Worker {
        Worker {
            name: name.to_string(),
            call: Box::new(move |_cancel| Box::pin(async move { outcome })),
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_remove_other_outcomes() {
        let registry = Arc::new(CircuitBreakerRegistry::new(3, Duration::from_secs(60), 1));
        let executor = ParallelExecutor::new(registry);

        let workers = vec![
            worker("fetch", Err(OrchestratorError::UpstreamTransient("x".into()))),
            worker("embed", Ok(serde_json::json!({"ok": true}))),
        ];

        let (outcomes, log) = executor
            .run_parallel(workers, Duration::from_secs(5), Uuid::nil(), false, true)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes["fetch"].status, OutcomeStatus::Failed);
        assert_eq!(outcomes["embed"].status, OutcomeStatus::Success);
        assert_eq!(log.success_count, 1);
        assert_eq!(log.failed_count, 1);
    }

    #[tokio::test]
    async fn timeout_outcome_reports_timeout_status() {
        let registry = Arc::new(CircuitBreakerRegistry::new(3, Duration::from_secs(60), 1));
        let executor = ParallelExecutor::new(registry);

        let slow = Worker {
            name: "slow".to_string(),
            call: Box::new(|_cancel| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(serde_json::json!({}))
                })
            }),
        };

        let (outcomes, _log) = executor
            .run_parallel(vec![slow], Duration::from_millis(10), Uuid::nil(), false, true)
            .await;

        assert_eq!(outcomes["slow"].status, OutcomeStatus::Timeout);
    }

    #[tokio::test]
    async fn duration_ms_is_non_negative_and_ordered() {
        let registry = Arc::new(CircuitBreakerRegistry::new(3, Duration::from_secs(60), 1));
        let executor = ParallelExecutor::new(registry);
        let workers = vec![worker("x", Ok(serde_json::json!(1)))];
        let (outcomes, _) = executor
            .run_parallel(workers, Duration::from_secs(5), Uuid::nil(), false, true)
            .await;
        let outcome = &outcomes["x"];
        assert!(outcome.completed_at >= outcome.started_at);
        assert!(outcome.duration_ms >= 0);
    }
}
