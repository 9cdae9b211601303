pub mod audit;
pub mod auth;
pub mod breaker;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsm;
pub mod gate;
pub mod handlers;
pub mod isolation;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod registrar;
pub mod repository;
pub mod state;
pub mod synth;
pub mod system_monitor;
pub mod upstream;
pub mod watchdog;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

// ═══════════════════════════════════════════════════════════════════════
//  Request correlation ID middleware — Jaskier Shared Pattern
// ═══════════════════════════════════════════════════════════════════════

/// Middleware that generates a UUID v4 correlation ID for each request.
///
/// - Adds it to the current tracing span as `request_id`
/// - Returns it in the `X-Request-Id` response header
/// - Accepts an incoming `X-Request-Id` header to propagate from upstream
async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("request_id", &request_id.as_str());
    tracing::debug!(request_id = %request_id, "request correlation ID assigned");

    let mut response = next.run(req).await;

    if let Ok(header_value) = axum::http::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}

// ── OpenAPI documentation ────────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Analytics Orchestrator API",
        version = "0.1.0",
        description = "Multi-tenant analytics orchestration service",
        license(name = "MIT")
    ),
    paths(
        handlers::health_check,
        handlers::readiness,
        handlers::auth_mode,
        handlers::system_stats,
        handlers::submit_query,
        handlers::breaker_stats,
        handlers::registrar_stats,
        handlers::trigger_shutdown,
    ),
    components(schemas(models::QueryRequest, models::Event, models::Report, models::Citation,)),
    tags(
        (name = "health", description = "Health & readiness endpoints"),
        (name = "auth", description = "Authentication mode"),
        (name = "system", description = "System monitoring"),
        (name = "orchestrator", description = "Query submission & streaming"),
        (name = "admin", description = "Breaker/registrar administration"),
    )
)]
pub struct ApiDoc;

/// Build the application router with the given shared state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // ── Per-endpoint rate limiting — Jaskier Shared Pattern ─────────────
    // Submission (triggers upstream fetch + embedding calls): 30 req/min
    let rl_submit = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(30)
        .finish()
        .expect("rate limiter config: submit");
    // Other protected routes: 120 req/min
    let rl_default = GovernorConfigBuilder::default()
        .per_millisecond(500)
        .burst_size(120)
        .finish()
        .expect("rate limiter config: default");

    // ── Public routes (no auth) ──────────────────────────────────────
    let public = Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/health/ready", get(handlers::readiness))
        .route("/api/auth/mode", get(handlers::auth_mode));

    // ── Protected: submission — rate-limited separately ─────────────
    let submit_routes = Router::new()
        .route("/api/queries", post(handlers::submit_query))
        .layer(GovernorLayer::new(rl_submit));

    // ── Protected: other routes ──────────────────────────────────────
    let other_routes = Router::new()
        .route("/api/system/stats", get(handlers::system_stats))
        .route("/api/queue/{request_id}/status", get(handlers::queue_status_stream))
        .route("/api/admin/breakers", get(handlers::breaker_stats))
        .route("/api/admin/connections", get(handlers::registrar_stats))
        .route("/api/admin/shutdown", post(handlers::trigger_shutdown))
        .layer(GovernorLayer::new(rl_default));

    let protected = submit_routes
        .merge(other_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    public
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 10 MB body limit — must be before .with_state() for Json extractor
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}
