use http::{header, Method};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;

use analytics_orchestrator::config::Config;
use analytics_orchestrator::state::AppState;
use analytics_orchestrator::{system_monitor, watchdog};

fn build_app(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-tenant-context"),
            header::HeaderName::from_static("x-user-id"),
            header::HeaderName::from_static("x-user-email"),
        ]);

    // Rate limiting: 30 req burst, replenish 1 per 2 seconds, per IP
    // Jaskier Shared Pattern -- rate_limit
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(30)
        .finish()
        .unwrap();

    analytics_orchestrator::create_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            header::HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            header::HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            header::HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    enable_ansi();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_ansi(true).init();
    }

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(3))
        .idle_timeout(std::time::Duration::from_secs(600))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .expect("DB connection failed");

    // Skip migrations if schema already exists (avoids checksum mismatch)
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::warn!("Migration skipped (schema likely exists): {}", e);
    }

    let port = config.bind_port;
    let state = AppState::new(config, pool);

    // ── Spawn system monitor (CPU/memory stats, refreshed every 5s) ──
    system_monitor::spawn(state.system_monitor.clone());

    // ── Spawn background watchdog ──
    let _watchdog = watchdog::spawn(state.clone());

    // ── Spawn queue worker manager control loop ──
    let worker_manager_shutdown = CancellationToken::new();
    let worker_manager = state.worker_manager.clone();
    let worker_manager_loop_token = worker_manager_shutdown.clone();
    let worker_manager_handle = tokio::spawn(async move {
        worker_manager.run(worker_manager_loop_token).await;
    });

    state.mark_ready();

    let app = build_app(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    print_banner(port);
    tracing::info!("analytics orchestrator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone(), worker_manager_shutdown))
    .await?;

    worker_manager_handle.await.ok();

    Ok(())
}

// This service targets container deployment (docker/k8s), not Windows
// consoles, so unlike the teacher there is no ANSI-mode shim here.
fn enable_ansi() {}

fn print_banner(port: u16) {
    println!();
    println!("  \x1b[1;33m>>>  ANALYTICS ORCHESTRATOR  <<<\x1b[0m");
    println!("  \x1b[33mMulti-tenant analytics orchestration service\x1b[0m");
    println!("  \x1b[1;32mhttp://localhost:{port}\x1b[0m");
    println!();
}

/// Waits for ctrl-c/SIGTERM, then drains connections through the
/// registrar before letting `axum::serve` finish (spec §4.5 shutdown).
async fn shutdown_signal(state: AppState, worker_manager_shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received, draining connections");

    worker_manager_shutdown.cancel();
    state
        .registrar
        .initiate_shutdown(state.config.registrar_default_grace, "server is shutting down")
        .await;
}
