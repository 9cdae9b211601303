//! `GET /api/queue/{request_id}/status` — NDJSON stream of queue-position
//! updates for one previously-enqueued request (spec §4.4 "queue tracker").

use async_stream::stream;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::queue::tracker;
use crate::state::AppState;

pub async fn queue_status_stream(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Response {
    let queue = state.queue.clone();
    let poll_interval = state.config.queue_tracker_poll_interval;
    let max_duration = state.config.queue_tracker_max_duration;
    let average_request_seconds = state.config.queue_average_request_seconds;

    let body_stream = stream! {
        let mut events = Box::pin(tracker::track(queue, request_id, poll_interval, max_duration, average_request_seconds));
        while let Some(event) = events.next().await {
            let line = serde_json::to_string(&event).unwrap_or_else(|_| {
                r#"{"status":"failed","message":"event serialization failed"}"#.to_string()
            });
            yield Ok::<_, std::io::Error>(axum::body::Bytes::from(format!("{line}\n")));
        }
    };

    ([("content-type", "application/x-ndjson")], Body::from_stream(body_stream)).into_response()
}
