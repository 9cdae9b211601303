//! `POST /api/queries` — submits one query and streams its progress as
//! NDJSON (spec §6, §4.7), grounded in the teacher's
//! `handlers/streaming.rs` NDJSON-over-`Body::from_stream` pattern.

use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;

use crate::auth::{extract_principal, extract_tenant_header};
use crate::error::OrchestratorError;
use crate::models::{ConnectionInfo, QueryRequest};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/api/queries",
    tag = "orchestrator",
    request_body = QueryRequest,
    responses((status = 200, description = "NDJSON event stream"))
)]
pub async fn submit_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Response, OrchestratorError> {
    let principal = extract_principal(&headers)?;
    let tenant_id = extract_tenant_header(&headers)?;

    let conn = ConnectionInfo {
        connection_id: uuid::Uuid::new_v4(),
        tenant_id,
        endpoint: "submit".to_string(),
        opened_at: chrono::Utc::now(),
        metadata: serde_json::json!({ "query": request.query }),
    };
    let (guard, shutdown_rx) = state.registrar.track(conn)?;

    let orchestrator = state.orchestrator.clone();
    let events = orchestrator.run_streaming(principal, tenant_id, request, shutdown_rx);

    let body_stream = stream! {
        let _guard = guard; // held until the stream is fully driven or dropped
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let line = serde_json::to_string(&event).unwrap_or_else(|_| {
                r#"{"type":"error","message":"event serialization failed"}"#.to_string()
            });
            yield Ok::<_, std::io::Error>(axum::body::Bytes::from(format!("{line}\n")));
        }
    };

    Ok((
        [("content-type", "application/x-ndjson")],
        Body::from_stream(body_stream),
    )
        .into_response())
}
