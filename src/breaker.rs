// Jaskier Shared Pattern -- circuit breaker
//! Per-worker-name circuit breaker (spec §4.1).
//!
//! Generalizes the teacher's single `CircuitBreaker` in `state.rs` (one
//! breaker for the Anthropic client) into a named registry, matching the
//! Python source's `CircuitBreakerRegistry` (`circuit_breakers.py`) where
//! every worker name gets its own independent breaker.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::OrchestratorError;
use crate::models::{BreakerStats, CircuitState};

#[derive(Debug)]
struct Inner {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    half_open_successes: AtomicU32,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    circuit_blocked_count: AtomicU64,
    opened_at: RwLock<Option<DateTime<Utc>>>,
    last_failure_at: RwLock<Option<DateTime<Utc>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            circuit_blocked_count: AtomicU64::new(0),
            opened_at: RwLock::new(None),
            last_failure_at: RwLock::new(None),
        }
    }
}

/// One named breaker. Cheap to clone (wraps an `Arc`'d registry entry via
/// `DashMap` — callers obtain a `CircuitBreakerHandle` from the registry,
/// never construct one directly).
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    inner: Inner,
}

impl CircuitBreaker {
    fn new(name: String, failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            name,
            failure_threshold,
            recovery_timeout,
            success_threshold,
            inner: Inner::new(),
        }
    }

    /// Whether a call is currently allowed. Transitions OPEN → HALF_OPEN
    /// when the recovery timeout has elapsed, per spec §4.1.
    fn allow_request(&self) -> Result<(), OrchestratorError> {
        let state = *self.inner.state.read().unwrap();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = *self.inner.opened_at.read().unwrap();
                let elapsed = opened_at.map(|t| Utc::now() - t).unwrap_or_default();
                if elapsed
                    >= chrono::Duration::from_std(self.recovery_timeout).unwrap_or_default()
                {
                    let mut state_w = self.inner.state.write().unwrap();
                    if *state_w == CircuitState::Open {
                        *state_w = CircuitState::HalfOpen;
                        self.inner.half_open_successes.store(0, Ordering::SeqCst);
                        tracing::info!(breaker = %self.name, "circuit half-open, re-probing");
                    }
                    Ok(())
                } else {
                    self.inner.circuit_blocked_count.fetch_add(1, Ordering::SeqCst);
                    let reopens_at = opened_at.unwrap_or_else(Utc::now)
                        + chrono::Duration::from_std(self.recovery_timeout).unwrap_or_default();
                    Err(OrchestratorError::BreakerOpen {
                        name: self.name.clone(),
                        failure_count: self.inner.failure_count.load(Ordering::SeqCst),
                        reopens_at,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        self.inner.total_successes.fetch_add(1, Ordering::SeqCst);
        let state = *self.inner.state.read().unwrap();
        match state {
            CircuitState::Closed => {
                self.inner.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.inner.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.success_threshold {
                    let mut state_w = self.inner.state.write().unwrap();
                    *state_w = CircuitState::Closed;
                    self.inner.failure_count.store(0, Ordering::SeqCst);
                    self.inner.half_open_successes.store(0, Ordering::SeqCst);
                    tracing::info!(breaker = %self.name, "circuit closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Counted failure: the breaker's own refusal (`BreakerOpen`) never
    /// reaches here — see `CircuitBreaker::call`.
    fn record_failure(&self) {
        self.inner.total_failures.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_failure_at.write().unwrap() = Some(Utc::now());

        let state = *self.inner.state.read().unwrap();
        match state {
            CircuitState::Closed => {
                let count = self.inner.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.failure_threshold {
                    let mut state_w = self.inner.state.write().unwrap();
                    *state_w = CircuitState::Open;
                    *self.inner.opened_at.write().unwrap() = Some(Utc::now());
                    tracing::warn!(breaker = %self.name, failures = count, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                let mut state_w = self.inner.state.write().unwrap();
                *state_w = CircuitState::Open;
                *self.inner.opened_at.write().unwrap() = Some(Utc::now());
                self.inner.half_open_successes.store(0, Ordering::SeqCst);
                tracing::warn!(breaker = %self.name, "circuit reopened on half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `fn`, gated by the breaker state, and records the outcome.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
    {
        self.inner.total_requests.fetch_add(1, Ordering::SeqCst);
        self.allow_request()?;

        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                if e.counts_as_breaker_failure() {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> BreakerStats {
        let total_requests = self.inner.total_requests.load(Ordering::SeqCst);
        let total_failures = self.inner.total_failures.load(Ordering::SeqCst);
        let failure_rate = if total_requests == 0 {
            0.0
        } else {
            total_failures as f64 / total_requests as f64
        };
        BreakerStats {
            name: self.name.clone(),
            state: *self.inner.state.read().unwrap(),
            total_requests,
            total_successes: self.inner.total_successes.load(Ordering::SeqCst),
            total_failures,
            circuit_blocked_count: self.inner.circuit_blocked_count.load(Ordering::SeqCst),
            current_failure_count: self.inner.failure_count.load(Ordering::SeqCst),
            failure_rate,
            opened_at: *self.inner.opened_at.read().unwrap(),
        }
    }

    /// Administrative reset to CLOSED with counts cleared.
    pub fn reset(&self) {
        *self.inner.state.write().unwrap() = CircuitState::Closed;
        self.inner.failure_count.store(0, Ordering::SeqCst);
        self.inner.half_open_successes.store(0, Ordering::SeqCst);
        *self.inner.opened_at.write().unwrap() = None;
    }

    pub fn state(&self) -> CircuitState {
        *self.inner.state.read().unwrap()
    }
}

/// Process-wide named breaker registry, injected once into `AppState`
/// (spec §9: "process-wide mutable singletons ... re-express as explicitly
/// owned objects injected into the orchestrator at startup").
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            recovery_timeout,
            success_threshold,
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let breaker = std::sync::Arc::new(CircuitBreaker::new(
            name.to_string(),
            self.failure_threshold,
            self.recovery_timeout,
            self.success_threshold,
        ));
        self.breakers
            .entry(name.to_string())
            .or_insert(breaker)
            .clone()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        self.breakers.iter().map(|e| e.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(3, Duration::from_millis(50), 1)
    }

    #[tokio::test]
    async fn opens_after_threshold_failures_and_blocks() {
        let reg = registry();
        let breaker = reg.get_or_create("fetch");

        for _ in 0..3 {
            let res: Result<(), OrchestratorError> = breaker
                .call(|| async { Err(OrchestratorError::UpstreamTransient("boom".into())) })
                .await;
            assert!(res.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let res: Result<(), OrchestratorError> = breaker.call(|| async { Ok(()) }).await;
        match res {
            Err(OrchestratorError::BreakerOpen { .. }) => {}
            other => panic!("expected BreakerOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_through_half_open_to_closed() {
        let reg = registry();
        let breaker = reg.get_or_create("embed");

        for _ in 0..3 {
            let _: Result<(), OrchestratorError> = breaker
                .call(|| async { Err(OrchestratorError::UpstreamTransient("boom".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let res: Result<(), OrchestratorError> = breaker.call(|| async { Ok(()) }).await;
        assert!(res.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);

        let stats = breaker.stats();
        assert_eq!(stats.current_failure_count, 0);
    }

    #[tokio::test]
    async fn breaker_refusal_is_not_recounted_as_failure() {
        let reg = registry();
        let breaker = reg.get_or_create("synth");
        for _ in 0..3 {
            let _: Result<(), OrchestratorError> = breaker
                .call(|| async { Err(OrchestratorError::UpstreamTransient("boom".into())) })
                .await;
        }
        let before = breaker.stats().total_failures;
        let _: Result<(), OrchestratorError> = breaker.call(|| async { Ok(()) }).await;
        let after = breaker.stats().total_failures;
        assert_eq!(before, after);
    }
}
