// Jaskier Shared Pattern — state
//! Central application state, the single top-level owner of every
//! explicitly-constructed component (spec §9: "re-express as explicitly
//! owned objects injected into the orchestrator at startup").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::breaker::CircuitBreakerRegistry;
use crate::config::Config;
use crate::executor::ParallelExecutor;
use crate::orchestrator::Orchestrator;
use crate::queue::worker::QueueWorkerManager;
use crate::queue::RequestQueue;
use crate::registrar::ConnectionRegistrar;
use crate::repository::{PgRepository, Repository};
use crate::gate::MembershipLookup;
use crate::system_monitor::SystemSnapshot;
use crate::upstream::{AnalyticsClient, EmbeddingClient};

/// Central application state. Clone-friendly — every field is a `PgPool`
/// or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub start_time: Instant,
    pub http_client: reqwest::Client,

    pub breakers: Arc<CircuitBreakerRegistry>,
    pub executor: Arc<ParallelExecutor>,
    pub registrar: Arc<ConnectionRegistrar>,
    pub repository: Arc<dyn Repository>,
    pub membership: Arc<dyn MembershipLookup>,
    pub queue: Arc<RequestQueue>,
    pub worker_manager: Arc<QueueWorkerManager>,
    pub orchestrator: Arc<Orchestrator>,

    /// `true` once the background sync tasks have completed their first pass.
    pub ready: Arc<AtomicBool>,
    /// Cached system stats (CPU, memory) refreshed every 5s by background task.
    pub system_monitor: Arc<RwLock<SystemSnapshot>>,
    /// Optional auth secret from AUTH_SECRET env. `None` = dev mode (no auth).
    pub auth_secret: Option<String>,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("orchestrator backend marked as READY");
    }

    pub fn new(config: Config, db: PgPool) -> Self {
        let config = Arc::new(config);

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.breaker_failure_threshold,
            config.breaker_recovery_timeout,
            config.breaker_success_threshold,
        ));
        let executor = Arc::new(ParallelExecutor::new(breakers.clone()));
        let registrar = Arc::new(ConnectionRegistrar::new());

        let pg_repository = Arc::new(PgRepository::new(db.clone()));
        let repository: Arc<dyn Repository> = pg_repository.clone();
        let membership: Arc<dyn MembershipLookup> = pg_repository;

        let queue = Arc::new(RequestQueue::new(
            config.queue_initial_backoff,
            config.queue_max_backoff,
            config.queue_backoff_multiplier,
            config.queue_result_ttl,
        ));

        let analytics = Arc::new(AnalyticsClient::new(
            http_client.clone(),
            config.analytics_base_url.clone(),
            config.analytics_timeout,
        ));
        let embedding = Arc::new(EmbeddingClient::new(
            http_client.clone(),
            config.embedding_base_url.clone(),
            config.embedding_timeout,
            config.embedding_expected_dimension,
        ));

        let worker_manager = Arc::new(QueueWorkerManager::new(
            queue.clone(),
            analytics.clone(),
            config.worker_manager_min_workers,
            config.worker_manager_max_workers,
            config.worker_manager_requests_per_worker,
            config.worker_manager_interval,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            repository.clone(),
            membership.clone(),
            queue.clone(),
            worker_manager.clone(),
            analytics,
            embedding,
            executor.clone(),
        ));

        let auth_secret = config.auth_secret.clone();
        if auth_secret.is_some() {
            tracing::info!("AUTH_SECRET configured — authentication enabled");
        } else {
            tracing::info!("AUTH_SECRET not set — authentication disabled (dev mode)");
        }

        Self {
            config,
            db,
            start_time: Instant::now(),
            http_client,
            breakers,
            executor,
            registrar,
            repository,
            membership,
            queue,
            worker_manager,
            orchestrator,
            ready: Arc::new(AtomicBool::new(false)),
            system_monitor: Arc::new(RwLock::new(SystemSnapshot::default())),
            auth_secret,
        }
    }

    /// Test-only constructor — uses `connect_lazy` so no real DB is needed.
    /// Only suitable for endpoints that don't issue SQL queries (or that
    /// gracefully handle DB errors).
    #[doc(hidden)]
    pub fn new_test() -> Self {
        let db = PgPool::connect_lazy("postgres://test@localhost:19999/test").expect("lazy pool");
        Self::new(Config::for_test(), db)
    }
}
