// Jaskier Shared Pattern -- backend integration test
//! Health/readiness/auth-mode endpoint integration tests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use analytics_orchestrator::state::AppState;

/// Build a test app router without requiring a real database.
fn test_app() -> axum::Router {
    let state = AppState::new_test();
    analytics_orchestrator::create_router(state)
}

/// Collect a response body into a `serde_json::Value`.
async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn readiness_is_false_before_background_tasks_run() {
    // `AppState::new_test` never marks itself ready since nothing calls
    // `mark_ready` outside `main`.
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn auth_mode_reports_open_when_no_secret_configured() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/auth/mode")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["mode"], "open");
}

#[tokio::test]
async fn system_stats_endpoint_is_reachable_without_auth_secret() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/api/system/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["platform"].is_string());
}
