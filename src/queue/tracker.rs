// Jaskier Shared Pattern -- queue tracker
//! Queue-position tracker stream (spec §4.4 "Queue tracker"), grounded in
//! the Python source's queue-status polling role: streams
//! `(position, queue_length, eta, status, message)` for one request_id at
//! a fixed cadence until the request reaches a terminal state or the
//! stream's maximum duration elapses.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use uuid::Uuid;

use super::RequestQueue;
use crate::models::{QueueStatus, QueueStatusEvent};

/// Produces `QueueStatusEvent`s for `request_id` every `poll_interval`
/// until terminal or `max_duration` elapses.
pub fn track(
    queue: Arc<RequestQueue>,
    request_id: Uuid,
    poll_interval: Duration,
    max_duration: Duration,
    average_request_seconds: f64,
) -> impl Stream<Item = QueueStatusEvent> {
    stream! {
        let deadline = tokio::time::Instant::now() + max_duration;

        loop {
            let Some(record) = queue.get(request_id) else {
                yield QueueStatusEvent {
                    request_id,
                    position: -1,
                    total_queue: 0,
                    eta_seconds: 0,
                    status: QueueStatus::Failed,
                    message: "request not found".to_string(),
                    timestamp: chrono::Utc::now(),
                };
                break;
            };

            let position = queue.queue_position(request_id).await;
            let total_queue = queue.queue_length(record.tenant_id).await;
            let eta_seconds = (position.max(0) as f64 * average_request_seconds) as i64;

            let message = match record.status {
                QueueStatus::Queued => format!("position {position} of {total_queue}"),
                QueueStatus::Processing => "processing".to_string(),
                QueueStatus::Completed => "completed".to_string(),
                QueueStatus::Failed => "failed".to_string(),
            };

            let terminal = record.status.is_terminal();

            yield QueueStatusEvent {
                request_id,
                position,
                total_queue,
                eta_seconds,
                status: record.status,
                message,
                timestamp: chrono::Utc::now(),
            };

            if terminal || tokio::time::Instant::now() >= deadline {
                break;
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn stream_terminates_once_request_completes() {
        let queue = Arc::new(RequestQueue::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2,
            Duration::from_secs(3600),
        ));
        let tenant = Uuid::new_v4();
        let id = queue
            .enqueue(tenant, Uuid::new_v4(), Role::Member, "fetch".into(), serde_json::json!({}), 50, 3, None)
            .await;

        struct AlwaysOk;
        #[async_trait::async_trait]
        impl super::super::UpstreamInvoker for AlwaysOk {
            async fn invoke(&self, _e: &str, _p: &serde_json::Value) -> Result<serde_json::Value, crate::error::OrchestratorError> {
                Ok(serde_json::json!({}))
            }
        }
        queue.process_one(tenant, &AlwaysOk).await;

        let mut events = Vec::new();
        let mut s = Box::pin(track(queue.clone(), id, Duration::from_millis(5), Duration::from_secs(1), 30.0));
        use futures_util::StreamExt;
        while let Some(ev) = s.next().await {
            events.push(ev);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, QueueStatus::Completed);
    }
}
