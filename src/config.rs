// Jaskier Shared Pattern -- config
//! Single explicit configuration record, loaded once at startup.
//!
//! Replaces the Python source's scattered `settings.py` plus per-call
//! keyword defaults with one record whose fields are enumerated here and
//! threaded through as `Arc<Config>` — no global mutable config.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_port: u16,
    pub database_url: String,
    /// `None` disables bearer-token auth (dev mode), matching the teacher's
    /// `AUTH_SECRET` handling.
    pub auth_secret: Option<String>,

    // ── Circuit breaker (spec §4.1) ──────────────────────────────────
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
    pub breaker_success_threshold: u32,

    // ── Parallel executor (spec §4.2, §5) ────────────────────────────
    pub executor_worker_timeout: Duration,

    // ── Orchestrator (spec §4.7, §5) ─────────────────────────────────
    pub orchestrator_timeout: Duration,
    pub cache_fast_path_budget: Duration,
    pub retrieval_top_k: usize,
    pub retrieval_min_similarity: f64,
    pub retrieval_high_confidence: f64,
    pub retrieval_medium_confidence: f64,
    pub retrieval_low_confidence: f64,
    pub degradation_cache_confidence_floor: f64,

    // ── Request queue (spec §4.4) ────────────────────────────────────
    pub queue_result_ttl: Duration,
    pub queue_initial_backoff: Duration,
    pub queue_max_backoff: Duration,
    pub queue_backoff_multiplier: u32,
    pub queue_default_wait_timeout: Duration,
    pub queue_tracker_poll_interval: Duration,
    pub queue_tracker_max_duration: Duration,
    pub queue_average_request_seconds: f64,

    // ── Worker manager (spec §4.4.1) ──────────────────────────────────
    pub worker_manager_interval: Duration,
    pub worker_manager_min_workers: usize,
    pub worker_manager_max_workers: usize,
    pub worker_manager_requests_per_worker: usize,

    // ── Connection registrar (spec §4.5) ─────────────────────────────
    pub registrar_default_grace: Duration,

    // ── Upstream clients (spec §6) ───────────────────────────────────
    pub analytics_base_url: String,
    pub analytics_timeout: Duration,
    pub embedding_base_url: String,
    pub embedding_timeout: Duration,
    pub embedding_expected_dimension: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_port: env_parse("PORT", 8082)?,
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL required"))?,
            auth_secret: std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty()),

            breaker_failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 3)?,
            breaker_recovery_timeout: Duration::from_secs(env_parse(
                "BREAKER_RECOVERY_TIMEOUT_SECS",
                60,
            )?),
            breaker_success_threshold: env_parse("BREAKER_SUCCESS_THRESHOLD", 1)?,

            executor_worker_timeout: Duration::from_secs(env_parse(
                "EXECUTOR_WORKER_TIMEOUT_SECS",
                30,
            )?),

            orchestrator_timeout: Duration::from_secs(env_parse(
                "ORCHESTRATOR_TIMEOUT_SECS",
                60,
            )?),
            cache_fast_path_budget: Duration::from_millis(env_parse(
                "CACHE_FAST_PATH_BUDGET_MS",
                500,
            )?),
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", 5)?,
            retrieval_min_similarity: env_parse_f64("RETRIEVAL_MIN_SIMILARITY", 0.70)?,
            retrieval_high_confidence: env_parse_f64("RETRIEVAL_HIGH_CONFIDENCE", 0.85)?,
            retrieval_medium_confidence: env_parse_f64("RETRIEVAL_MEDIUM_CONFIDENCE", 0.70)?,
            retrieval_low_confidence: env_parse_f64("RETRIEVAL_LOW_CONFIDENCE", 0.50)?,
            degradation_cache_confidence_floor: env_parse_f64(
                "DEGRADATION_CACHE_CONFIDENCE_FLOOR",
                0.70,
            )?,

            queue_result_ttl: Duration::from_secs(env_parse("QUEUE_RESULT_TTL_SECS", 3600)?),
            queue_initial_backoff: Duration::from_secs(env_parse(
                "QUEUE_INITIAL_BACKOFF_SECS",
                2,
            )?),
            queue_max_backoff: Duration::from_secs(env_parse("QUEUE_MAX_BACKOFF_SECS", 60)?),
            queue_backoff_multiplier: env_parse("QUEUE_BACKOFF_MULTIPLIER", 2)?,
            queue_default_wait_timeout: Duration::from_secs(env_parse(
                "QUEUE_DEFAULT_WAIT_TIMEOUT_SECS",
                600,
            )?),
            queue_tracker_poll_interval: Duration::from_secs(env_parse(
                "QUEUE_TRACKER_POLL_INTERVAL_SECS",
                5,
            )?),
            queue_tracker_max_duration: Duration::from_secs(env_parse(
                "QUEUE_TRACKER_MAX_DURATION_SECS",
                600,
            )?),
            queue_average_request_seconds: env_parse_f64("QUEUE_AVERAGE_REQUEST_SECONDS", 30.0)?,

            worker_manager_interval: Duration::from_secs(env_parse(
                "WORKER_MANAGER_INTERVAL_SECS",
                30,
            )?),
            worker_manager_min_workers: env_parse("WORKER_MANAGER_MIN_WORKERS", 1)?,
            worker_manager_max_workers: env_parse("WORKER_MANAGER_MAX_WORKERS", 5)?,
            worker_manager_requests_per_worker: env_parse(
                "WORKER_MANAGER_REQUESTS_PER_WORKER",
                10,
            )?,

            registrar_default_grace: Duration::from_secs(env_parse(
                "REGISTRAR_DEFAULT_GRACE_SECS",
                20,
            )?),

            analytics_base_url: std::env::var("ANALYTICS_BASE_URL")
                .unwrap_or_else(|_| "https://analyticsdata.googleapis.com".to_string()),
            analytics_timeout: Duration::from_secs(env_parse("ANALYTICS_TIMEOUT_SECS", 30)?),
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.embeddings.internal".to_string()),
            embedding_timeout: Duration::from_secs(env_parse("EMBEDDING_TIMEOUT_SECS", 30)?),
            embedding_expected_dimension: env_parse("EMBEDDING_DIMENSION", 1536)?,
        })
    }

    /// Test-only configuration with conservative defaults — no env required.
    pub fn for_test() -> Self {
        Self {
            bind_port: 0,
            database_url: "postgres://test@localhost:19999/test".to_string(),
            auth_secret: None,
            breaker_failure_threshold: 3,
            breaker_recovery_timeout: Duration::from_secs(60),
            breaker_success_threshold: 1,
            executor_worker_timeout: Duration::from_secs(30),
            orchestrator_timeout: Duration::from_secs(60),
            cache_fast_path_budget: Duration::from_millis(500),
            retrieval_top_k: 5,
            retrieval_min_similarity: 0.70,
            retrieval_high_confidence: 0.85,
            retrieval_medium_confidence: 0.70,
            retrieval_low_confidence: 0.50,
            degradation_cache_confidence_floor: 0.70,
            queue_result_ttl: Duration::from_secs(3600),
            queue_initial_backoff: Duration::from_secs(2),
            queue_max_backoff: Duration::from_secs(60),
            queue_backoff_multiplier: 2,
            queue_default_wait_timeout: Duration::from_secs(600),
            queue_tracker_poll_interval: Duration::from_secs(5),
            queue_tracker_max_duration: Duration::from_secs(600),
            queue_average_request_seconds: 30.0,
            worker_manager_interval: Duration::from_secs(30),
            worker_manager_min_workers: 1,
            worker_manager_max_workers: 5,
            worker_manager_requests_per_worker: 10,
            registrar_default_grace: Duration::from_secs(20),
            analytics_base_url: "http://localhost:0".to_string(),
            analytics_timeout: Duration::from_secs(5),
            embedding_base_url: "http://localhost:0".to_string(),
            embedding_timeout: Duration::from_secs(5),
            embedding_expected_dimension: 8,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_parse_f64(key: &str, default: f64) -> anyhow::Result<f64> {
    env_parse(key, default)
}
