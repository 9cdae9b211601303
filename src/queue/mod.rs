// Jaskier Shared Pattern -- request queue
//! Per-tenant priority request queue (spec §4.4), grounded in the Python
//! source's `GA4RequestQueue` (`request_queue.py`). The source backs its
//! ordered set and result records with Redis ZSETs/hashes; per spec.md's
//! Non-goal ("durable queue persistence across node restarts ... in-memory
//! ... is sufficient for the grace window") this is reimplemented in
//! memory: a `BTreeSet<QueueKey>` per tenant for ordering and a
//! `DashMap<Uuid, QueuedRequest>` for result records.

pub mod tracker;
pub mod worker;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{QueueKey, QueueStatus, QueuedRequest, Role};

/// Abstracts the endpoint invocation a queue worker performs once it pops
/// a request — the analytics/embedding upstream clients implement this
/// (spec's "abstracted as fallible RPC clients").
#[async_trait::async_trait]
pub trait UpstreamInvoker: Send + Sync {
    async fn invoke(&self, endpoint: &str, params: &serde_json::Value) -> Result<serde_json::Value, OrchestratorError>;
}

struct TenantQueue {
    order: Mutex<BTreeSet<QueueKey>>,
}

impl TenantQueue {
    fn new() -> Self {
        Self {
            order: Mutex::new(BTreeSet::new()),
        }
    }
}

pub struct RequestQueue {
    tenants: DashMap<Uuid, Arc<TenantQueue>>,
    results: DashMap<Uuid, QueuedRequest>,
    idempotency: DashMap<String, Uuid>,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: u32,
    result_ttl: Duration,
}

impl RequestQueue {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, backoff_multiplier: u32, result_ttl: Duration) -> Self {
        Self {
            tenants: DashMap::new(),
            results: DashMap::new(),
            idempotency: DashMap::new(),
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            result_ttl,
        }
    }

    fn tenant_queue(&self, tenant_id: Uuid) -> Arc<TenantQueue> {
        self.tenants
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(TenantQueue::new()))
            .clone()
    }

    /// Inserts a new request, or — if `idempotency_key` matches a
    /// non-expired existing entry — returns the existing `request_id`
    /// instead of enqueueing a duplicate (SPEC_FULL §11 idempotency
    /// decision: dedup at the queue layer).
    pub async fn enqueue(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        endpoint: String,
        params: serde_json::Value,
        priority: u8,
        max_retries: u32,
        idempotency_key: Option<String>,
    ) -> Uuid {
        if let Some(ref key) = idempotency_key {
            if let Some(existing) = self.idempotency.get(key) {
                let id = *existing;
                if let Some(record) = self.results.get(&id) {
                    let fresh = Utc::now() - record.queued_at
                        < chrono::Duration::from_std(self.result_ttl).unwrap_or_default();
                    if fresh {
                        tracing::info!(request_id = %id, "idempotent resubmission, returning existing request");
                        return id;
                    }
                }
            }
        }

        let request = QueuedRequest::new(
            tenant_id, user_id, role, endpoint, params, priority, max_retries, idempotency_key.clone(),
        );
        let request_id = request.request_id;
        let key = QueueKey::from(&request);

        if let Some(ref idk) = idempotency_key {
            self.idempotency.insert(idk.clone(), request_id);
        }
        self.results.insert(request_id, request);

        let tq = self.tenant_queue(tenant_id);
        tq.order.lock().await.insert(key);

        tracing::info!(tenant_id = %tenant_id, request_id = %request_id, "enqueued request");
        request_id
    }

    /// 1-indexed rank within the owning tenant's ordered set; 0 if the
    /// request is not currently queued; -1 if unknown entirely.
    pub async fn queue_position(&self, request_id: Uuid) -> i64 {
        let Some(record) = self.results.get(&request_id) else {
            return -1;
        };
        if record.status != QueueStatus::Queued {
            return 0;
        }
        let tq = self.tenant_queue(record.tenant_id);
        let key = QueueKey::from(&*record);
        let order = tq.order.lock().await;
        match order.iter().position(|k| *k == key) {
            Some(idx) => (idx + 1) as i64,
            None => 0,
        }
    }

    pub async fn queue_length(&self, tenant_id: Uuid) -> i64 {
        let tq = self.tenant_queue(tenant_id);
        tq.order.lock().await.len() as i64
    }

    pub fn get(&self, request_id: Uuid) -> Option<QueuedRequest> {
        self.results.get(&request_id).map(|r| r.clone())
    }

    /// Polls the result record with exponentially-growing backoff capped
    /// at 5s (spec §4.4), returning on terminal status or timing out.
    pub async fn wait_for_result(&self, request_id: Uuid, timeout: Duration) -> Option<QueuedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut wait = Duration::from_millis(100);
        const POLL_CAP: Duration = Duration::from_secs(5);

        loop {
            if let Some(record) = self.results.get(&request_id) {
                if record.status.is_terminal() {
                    return Some(record.clone());
                }
            } else {
                return None;
            }

            if tokio::time::Instant::now() >= deadline {
                return self.results.get(&request_id).map(|r| r.clone());
            }

            tokio::time::sleep(wait.min(POLL_CAP)).await;
            wait = (wait * 2).min(POLL_CAP);
        }
    }

    /// Pops the lowest-scoring entry for `tenant_id`, if any.
    async fn pop(&self, tenant_id: Uuid) -> Option<Uuid> {
        let tq = self.tenant_queue(tenant_id);
        let mut order = tq.order.lock().await;
        let key = order.iter().next().copied()?;
        order.remove(&key);
        Some(key.request_id)
    }

    /// Re-inserts `request_id` with a fresh score after bumping its
    /// `queued_at`/`retry_count` — used by the worker's retry path.
    async fn requeue(&self, request_id: Uuid) {
        let Some(mut record) = self.results.get_mut(&request_id) else {
            return;
        };
        record.queued_at = Utc::now();
        record.status = QueueStatus::Queued;
        let key = QueueKey::from(&*record);
        let tenant_id = record.tenant_id;
        drop(record);

        let tq = self.tenant_queue(tenant_id);
        tq.order.lock().await.insert(key);
    }

    fn backoff_for(&self, retry_count: u32) -> Duration {
        let millis = (self.initial_backoff.as_millis() as u64)
            .saturating_mul((self.backoff_multiplier as u64).saturating_pow(retry_count));
        Duration::from_millis(millis).min(self.max_backoff)
    }

    /// Runs one worker tick for `tenant_id`: pop, invoke, update result,
    /// and on rate-limit failure requeue with backoff (spec §4.4 worker
    /// protocol). Returns `true` if an entry was processed.
    pub async fn process_one(&self, tenant_id: Uuid, invoker: &dyn UpstreamInvoker) -> bool {
        let Some(request_id) = self.pop(tenant_id).await else {
            return false;
        };

        let Some(mut record) = self.results.get_mut(&request_id) else {
            tracing::warn!(request_id = %request_id, "queued request missing its result record");
            return true;
        };
        record.status = QueueStatus::Processing;
        let endpoint = record.endpoint.clone();
        let params = record.params.clone();
        let retry_count = record.retry_count;
        let max_retries = record.max_retries;
        drop(record);

        match invoker.invoke(&endpoint, &params).await {
            Ok(result) => {
                if let Some(mut record) = self.results.get_mut(&request_id) {
                    record.status = QueueStatus::Completed;
                    record.result = Some(result);
                    record.assert_invariants();
                }
            }
            Err(OrchestratorError::UpstreamRateLimited(msg)) => {
                if retry_count < max_retries {
                    let backoff = self.backoff_for(retry_count);
                    tracing::warn!(request_id = %request_id, retry_count, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
                    if let Some(mut record) = self.results.get_mut(&request_id) {
                        record.retry_count += 1;
                    }
                    tokio::time::sleep(backoff).await;
                    self.requeue(request_id).await;
                } else if let Some(mut record) = self.results.get_mut(&request_id) {
                    record.status = QueueStatus::Failed;
                    record.error = Some(format!("exhausted retries: {msg}"));
                    record.assert_invariants();
                }
            }
            Err(e) => {
                if let Some(mut record) = self.results.get_mut(&request_id) {
                    record.status = QueueStatus::Failed;
                    record.error = Some(e.to_string());
                    record.assert_invariants();
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl UpstreamInvoker for AlwaysOk {
        async fn invoke(&self, _endpoint: &str, _params: &serde_json::Value) -> Result<serde_json::Value, OrchestratorError> {
            Ok(serde_json::json!({"rows": []}))
        }
    }

    struct AlwaysRateLimited;
    #[async_trait::async_trait]
    impl UpstreamInvoker for AlwaysRateLimited {
        async fn invoke(&self, _endpoint: &str, _params: &serde_json::Value) -> Result<serde_json::Value, OrchestratorError> {
            Err(OrchestratorError::UpstreamRateLimited("slow down".into()))
        }
    }

    fn queue() -> RequestQueue {
        RequestQueue::new(Duration::from_millis(1), Duration::from_millis(5), 2, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn enqueue_then_one_tick_reaches_terminal_status() {
        let q = queue();
        let tenant = Uuid::new_v4();
        let id = q.enqueue(tenant, Uuid::new_v4(), Role::Member, "fetch".into(), serde_json::json!({}), 50, 3, None).await;
        assert_eq!(q.queue_position(id).await, 1);

        let invoker = AlwaysOk;
        assert!(q.process_one(tenant, &invoker).await);

        let record = q.get(id).unwrap();
        assert_eq!(record.status, QueueStatus::Completed);
        assert_eq!(q.queue_position(id).await, 0);
    }

    #[tokio::test]
    async fn priority_orders_owner_before_viewer_at_same_instant() {
        let q = queue();
        let tenant = Uuid::new_v4();
        let viewer = q.enqueue(tenant, Uuid::new_v4(), Role::Viewer, "fetch".into(), serde_json::json!({}), 50, 3, None).await;
        let owner = q.enqueue(tenant, Uuid::new_v4(), Role::Owner, "fetch".into(), serde_json::json!({}), 50, 3, None).await;
        let member = q.enqueue(tenant, Uuid::new_v4(), Role::Member, "fetch".into(), serde_json::json!({}), 50, 3, None).await;

        let invoker = AlwaysOk;
        q.process_one(tenant, &invoker).await;
        assert_eq!(q.get(owner).unwrap().status, QueueStatus::Completed);
        assert_eq!(q.get(member).unwrap().status, QueueStatus::Queued);
        assert_eq!(q.get(viewer).unwrap().status, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn rate_limit_exhausts_retries_then_fails() {
        let q = queue();
        let tenant = Uuid::new_v4();
        let id = q.enqueue(tenant, Uuid::new_v4(), Role::Member, "fetch".into(), serde_json::json!({}), 50, 1, None).await;

        let invoker = AlwaysRateLimited;
        q.process_one(tenant, &invoker).await;
        assert_eq!(q.get(id).unwrap().status, QueueStatus::Queued);
        assert_eq!(q.get(id).unwrap().retry_count, 1);

        q.process_one(tenant, &invoker).await;
        let record = q.get(id).unwrap();
        assert_eq!(record.status, QueueStatus::Failed);
        assert!(record.error.unwrap().contains("exhausted retries"));
    }

    #[tokio::test]
    async fn idempotent_enqueue_returns_same_request_id() {
        let q = queue();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let id1 = q.enqueue(tenant, user, Role::Member, "fetch".into(), serde_json::json!({}), 50, 3, Some("tok-1".into())).await;
        let id2 = q.enqueue(tenant, user, Role::Member, "fetch".into(), serde_json::json!({}), 50, 3, Some("tok-1".into())).await;
        assert_eq!(id1, id2);
        assert_eq!(q.queue_length(tenant).await, 1);
    }
}
