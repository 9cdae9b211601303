//! Admin endpoints: breaker stats, registrar stats, graceful shutdown
//! trigger (spec §4.1 stats surface, §4.5 shutdown).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/admin/breakers",
    tag = "admin",
    responses((status = 200, description = "Circuit breaker stats"))
)]
pub async fn breaker_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "breakers": state.breakers.all_stats() }))
}

#[utoipa::path(
    get,
    path = "/api/admin/connections",
    tag = "admin",
    responses((status = 200, description = "Connection registrar stats"))
)]
pub async fn registrar_stats(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.registrar.stats()).unwrap_or_else(|_| json!({})))
}

#[utoipa::path(
    post,
    path = "/api/admin/shutdown",
    tag = "admin",
    responses((status = 202, description = "Shutdown initiated"))
)]
pub async fn trigger_shutdown(State(state): State<AppState>) -> StatusCode {
    let registrar = state.registrar.clone();
    let grace = state.config.registrar_default_grace;
    tokio::spawn(async move {
        registrar.initiate_shutdown(grace, "server is shutting down").await;
    });
    StatusCode::ACCEPTED
}
