//! Health, readiness, system stats, and auth-mode endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, description = "Service healthy"))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let breakers_ok = state
        .breakers
        .all_stats()
        .iter()
        .all(|b| b.state != crate::models::CircuitState::Open);

    Json(json!({
        "status": if db_ok && breakers_ok { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "database": db_ok,
        "breakers_ok": breakers_ok,
    }))
}

#[utoipa::path(
    get,
    path = "/api/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready"),
        (status = 503, description = "Service not yet ready")
    )
)]
pub async fn readiness(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if state.is_ready() {
        Ok(Json(json!({ "ready": true })))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/mode",
    tag = "auth",
    responses((status = 200, description = "Authentication mode"))
)]
pub async fn auth_mode(State(state): State<AppState>) -> Json<Value> {
    let mode = if state.auth_secret.is_some() { "protected" } else { "open" };
    Json(json!({ "mode": mode }))
}

#[utoipa::path(
    get,
    path = "/api/system/stats",
    tag = "system",
    responses((status = 200, description = "System statistics"))
)]
pub async fn system_stats(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.system_monitor.read().await;
    Json(json!({
        "cpu_usage_percent": snapshot.cpu_usage_percent,
        "memory_used_mb": snapshot.memory_used_mb,
        "memory_total_mb": snapshot.memory_total_mb,
        "platform": snapshot.platform,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}
