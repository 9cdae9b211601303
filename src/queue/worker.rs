// Jaskier Shared Pattern -- queue worker manager
//! Auto-scaled per-tenant worker pool (spec §4.4.1), grounded in the Python
//! source's `QueueWorkerManager` (`queue_worker.py`): a control loop that
//! computes a desired worker count per tenant and adjusts the live pool,
//! tearing down empty-queue tenants and draining cooperatively on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{RequestQueue, UpstreamInvoker};

struct TenantPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

pub struct QueueWorkerManager {
    queue: Arc<RequestQueue>,
    invoker: Arc<dyn UpstreamInvoker>,
    pools: Mutex<HashMap<Uuid, TenantPool>>,
    min_workers: usize,
    max_workers: usize,
    requests_per_worker: usize,
    interval: Duration,
}

impl QueueWorkerManager {
    pub fn new(
        queue: Arc<RequestQueue>,
        invoker: Arc<dyn UpstreamInvoker>,
        min_workers: usize,
        max_workers: usize,
        requests_per_worker: usize,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            invoker,
            pools: Mutex::new(HashMap::new()),
            min_workers,
            max_workers,
            requests_per_worker,
            interval,
        }
    }

    fn desired_workers(&self, queue_length: i64) -> usize {
        let raw = (queue_length as usize).div_ceil(self.requests_per_worker.max(1));
        raw.clamp(self.min_workers, self.max_workers)
    }

    /// Ensures at least one worker is running for `tenant_id` — called by
    /// the queue on enqueue (spec §4.4: "guarantees a worker for that
    /// tenant is running").
    pub async fn ensure_worker(self: &Arc<Self>, tenant_id: Uuid) {
        let mut pools = self.pools.lock().await;
        if pools.contains_key(&tenant_id) {
            return;
        }
        let pool = self.spawn_pool(tenant_id, 1);
        pools.insert(tenant_id, pool);
    }

    fn spawn_pool(self: &Arc<Self>, tenant_id: Uuid, count: usize) -> TenantPool {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(count);
        for worker_idx in 0..count {
            handles.push(self.spawn_worker(tenant_id, worker_idx, cancel.clone()));
        }
        TenantPool { handles, cancel }
    }

    fn spawn_worker(
        self: &Arc<Self>,
        tenant_id: Uuid,
        worker_idx: usize,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let invoker = self.invoker.clone();
        tokio::spawn(async move {
            tracing::debug!(tenant_id = %tenant_id, worker_idx, "queue worker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(tenant_id = %tenant_id, worker_idx, "queue worker draining on shutdown signal");
                        break;
                    }
                    processed = queue.process_one(tenant_id, invoker.as_ref()) => {
                        if !processed {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    }
                }
            }
        })
    }

    /// Control loop (spec §4.4.1, ~30s interval): scales each tenant's
    /// pool to `clip(queue_length/requests_per_worker, 1, 5)`, tearing
    /// down pools for tenants whose queue has drained.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!("queue worker manager: started (interval={}s)", self.interval.as_secs());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain_all().await;
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.rebalance().await;
                }
            }
        }
    }

    async fn rebalance(self: &Arc<Self>) {
        let tenant_ids: Vec<Uuid> = {
            let pools = self.pools.lock().await;
            pools.keys().copied().collect()
        };

        for tenant_id in tenant_ids {
            let queue_length = self.queue.queue_length(tenant_id).await;
            let mut pools = self.pools.lock().await;

            if queue_length == 0 {
                if let Some(pool) = pools.remove(&tenant_id) {
                    pool.cancel.cancel();
                    tracing::info!(tenant_id = %tenant_id, "tearing down idle worker pool");
                }
                continue;
            }

            let desired = self.desired_workers(queue_length);
            if let Some(pool) = pools.get_mut(&tenant_id) {
                let current = pool.handles.len();
                if desired > current {
                    for idx in current..desired {
                        pool.handles.push(self.spawn_worker(tenant_id, idx, pool.cancel.clone()));
                    }
                    tracing::info!(tenant_id = %tenant_id, current, desired, "scaled workers up");
                } else if desired < current {
                    for handle in pool.handles.drain(desired..) {
                        handle.abort();
                    }
                    tracing::info!(tenant_id = %tenant_id, current, desired, "scaled workers down");
                }
            }
        }
    }

    async fn drain_all(&self) {
        let mut pools = self.pools.lock().await;
        for (tenant_id, pool) in pools.drain() {
            pool.cancel.cancel();
            tracing::info!(tenant_id = %tenant_id, "queue worker pool draining for shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_workers_clips_to_min_and_max() {
        let queue = Arc::new(RequestQueue::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            2,
            Duration::from_secs(3600),
        ));
        struct NoopInvoker;
        #[async_trait::async_trait]
        impl UpstreamInvoker for NoopInvoker {
            async fn invoke(&self, _e: &str, _p: &serde_json::Value) -> Result<serde_json::Value, crate::error::OrchestratorError> {
                Ok(serde_json::json!({}))
            }
        }
        let manager = QueueWorkerManager::new(queue, Arc::new(NoopInvoker), 1, 5, 10, Duration::from_secs(30));

        assert_eq!(manager.desired_workers(0), 1);
        assert_eq!(manager.desired_workers(5), 1);
        assert_eq!(manager.desired_workers(25), 3);
        assert_eq!(manager.desired_workers(1000), 5);
    }
}
