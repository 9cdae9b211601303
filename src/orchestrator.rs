// Jaskier Shared Pattern -- orchestrator
//! The end-to-end pipeline (spec §4.7), composing the Gate, FSM, Executor,
//! Repository and upstream clients into one progress stream per query.
//! Grounded in the Python source's enhanced (parallel) orchestrator
//! variant — this crate mandates the fresh-data-only embedding-persistence
//! rule where the source's two variants diverged (SPEC_FULL §12 item 3).

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::executor::{OutcomeStatus, ParallelExecutor, Worker};
use crate::fsm::WorkflowFsm;
use crate::gate::{MembershipLookup, TenantGate};
use crate::models::{ConfidenceLabel, Event, Principal, QueryRequest, ShutdownNotice, Trigger};
use crate::queue::worker::QueueWorkerManager;
use crate::queue::RequestQueue;
use crate::repository::{Repository, RetrievalResult};
use crate::synth::{self, FetchedData};
use crate::upstream::analytics::{AnalyticsFetchParams, AnalyticsFetchResult};
use crate::upstream::embedding::EmbeddingClient;
use crate::upstream::AnalyticsClient;

pub struct Orchestrator {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
    membership: Arc<dyn MembershipLookup>,
    queue: Arc<RequestQueue>,
    worker_manager: Arc<QueueWorkerManager>,
    analytics: Arc<AnalyticsClient>,
    embedding: Arc<EmbeddingClient>,
    executor: Arc<ParallelExecutor>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn Repository>,
        membership: Arc<dyn MembershipLookup>,
        queue: Arc<RequestQueue>,
        worker_manager: Arc<QueueWorkerManager>,
        analytics: Arc<AnalyticsClient>,
        embedding: Arc<EmbeddingClient>,
        executor: Arc<ParallelExecutor>,
    ) -> Self {
        Self {
            config,
            repository,
            membership,
            queue,
            worker_manager,
            analytics,
            embedding,
            executor,
        }
    }

    /// Runs the full pipeline for one query and streams its progress.
    /// `shutdown_rx` is the receiver the caller obtained from
    /// `ConnectionRegistrar::track` for the owning connection.
    pub fn run_streaming(
        self: Arc<Self>,
        principal: Principal,
        requested_tenant_id: Uuid,
        request: QueryRequest,
        mut shutdown_rx: broadcast::Receiver<ShutdownNotice>,
    ) -> impl Stream<Item = Event> {
        stream! {
            let start = chrono::Utc::now();
            let query_id = Uuid::new_v4();

            // Step 1: gate.
            let gate = TenantGate::new(self.membership.as_ref());
            let (tenant_id, role) = match gate.authorize(&principal, requested_tenant_id).await {
                Ok(pair) => pair,
                Err(e) => {
                    yield Event::Error { message: e.to_string() };
                    return;
                }
            };

            // Step 2: FSM start.
            let mut fsm = WorkflowFsm::new(tenant_id, query_id);
            yield Event::Status { message: "initializing".to_string(), progress: 0.0 };
            fsm.fire(Trigger::Start);

            if let Some(notice) = shutdown_notice(&mut shutdown_rx) {
                yield Event::Shutdown { message: notice.message, reconnect_delay_seconds: notice.reconnect_delay_seconds };
                return;
            }

            // Step 3: cache-first fast path.
            match tokio::time::timeout(
                self.config.cache_fast_path_budget,
                self.repository.lookup_cached_report(&request.query, tenant_id, request.property_id.as_deref()),
            )
            .await
            {
                Ok(Ok(Some(report))) => {
                    yield Event::Status { message: "using cached result".to_string(), progress: 0.0 };
                    yield Event::Result {
                        payload: report.clone(),
                        cached: true,
                        metadata: serde_json::json!({
                            "query_id": query_id,
                            "duration_ms": (chrono::Utc::now() - start).num_milliseconds(),
                            "data_source": "cached",
                            "retrieval_confidence": report.confidence,
                            "transitions_count": fsm.audit_trail().len(),
                        }),
                    };
                    return;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(query_id = %query_id, "cache lookup failed, continuing: {e}");
                }
                Err(_elapsed) => {
                    tracing::debug!(query_id = %query_id, "cache fast path budget exceeded, continuing");
                }
            }

            // Step 4: parallel data collection.
            yield Event::Status { message: "fetching".to_string(), progress: 0.1 };

            let fetch_params = AnalyticsFetchParams {
                property_id: request.property_id.clone().unwrap_or_default(),
                date_range: "last_7_days".to_string(),
                dimensions: request.dimensions.clone().unwrap_or_default(),
                metrics: request.metrics.clone().unwrap_or_default(),
                limit: 1000,
                offset: 0,
            };

            let fetch_worker = build_fetch_worker(
                self.analytics.clone(),
                self.queue.clone(),
                self.worker_manager.clone(),
                tenant_id,
                principal.user_id,
                role,
                fetch_params,
                self.config.queue_default_wait_timeout,
            );
            let embed_worker = build_embed_worker(self.embedding.clone(), request.query.clone());

            let (mut outcomes, _log) = self
                .executor
                .run_parallel(
                    vec![fetch_worker, embed_worker],
                    self.config.executor_worker_timeout,
                    tenant_id,
                    false,
                    true,
                )
                .await;

            let fetch_outcome = outcomes.remove("fetch");
            let embed_outcome = outcomes.remove("embed");

            let fetch_ok = fetch_outcome.as_ref().is_some_and(|o| o.status == OutcomeStatus::Success);
            let fetched: Option<AnalyticsFetchResult> = fetch_outcome
                .as_ref()
                .filter(|o| o.status == OutcomeStatus::Success)
                .and_then(|o| o.result.clone())
                .and_then(|v| serde_json::from_value(v).ok());
            let cache_hit = fetched.as_ref().is_some_and(|f| f.cache_hit);

            let embedding_vec: Option<Vec<f32>> = embed_outcome
                .as_ref()
                .filter(|o| o.status == OutcomeStatus::Success)
                .and_then(|o| o.result.clone())
                .and_then(|v| serde_json::from_value(v).ok());

            if cache_hit {
                fsm.fire(Trigger::DataCached);
            } else {
                fsm.fire(Trigger::DataFetched);
                fsm.fire(Trigger::DataValidated);
                fsm.fire(Trigger::EmbeddingsGenerated);
            }

            if let Some(notice) = shutdown_notice(&mut shutdown_rx) {
                yield Event::Shutdown { message: notice.message, reconnect_delay_seconds: notice.reconnect_delay_seconds };
                return;
            }

            // Step 5: context retrieval.
            yield Event::Status { message: "searching".to_string(), progress: 0.4 };

            let scope = TenantGate::scope(tenant_id, principal.user_id);
            let thresholds = (
                self.config.retrieval_high_confidence,
                self.config.retrieval_medium_confidence,
                self.config.retrieval_low_confidence,
            );

            let retrieval = match &embedding_vec {
                Some(vec) => match self
                    .repository
                    .top_k_similar(vec, self.config.retrieval_top_k, self.config.retrieval_min_similarity, scope, thresholds)
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(query_id = %query_id, "retrieval failed, proceeding with empty context: {e}");
                        empty_retrieval()
                    }
                },
                None => empty_retrieval(),
            };
            fsm.fire(Trigger::ContextRetrieved);

            // Step 6: graceful-degradation decision.
            yield Event::Status { message: "processing".to_string(), progress: 0.6 };

            if !fetch_ok {
                if retrieval.average_similarity > self.config.degradation_cache_confidence_floor {
                    yield Event::Warning { message: "upstream unavailable, using historical data".to_string() };
                } else {
                    fsm.fire(Trigger::Error);
                    yield Event::Error {
                        message: "unable to retrieve fresh or sufficiently confident historical data for this query".to_string(),
                    };
                    return;
                }
            }

            if let Some(notice) = shutdown_notice(&mut shutdown_rx) {
                yield Event::Shutdown { message: notice.message, reconnect_delay_seconds: notice.reconnect_delay_seconds };
                return;
            }

            // Step 7: conditional embedding persistence (fresh data only).
            if fetch_ok && !cache_hit {
                if let (Some(data), Some(vec)) = (&fetched, &embedding_vec) {
                    spawn_embedding_persistence(
                        self.repository.clone(),
                        tenant_id,
                        request.property_id.clone(),
                        data.clone(),
                        vec.clone(),
                    );
                }
            }

            // Step 8: synthesis.
            yield Event::Status { message: "generating".to_string(), progress: 0.8 };

            let fetched_data = fetched.as_ref().map(|f| FetchedData {
                rows: f.rows.clone(),
                dimension_headers: f.dimension_headers.clone(),
                metric_headers: f.metric_headers.clone(),
            });
            let report = synth::synthesize(
                tenant_id,
                &request.query,
                fetched_data.as_ref(),
                &retrieval.citations,
                retrieval.status_label,
            );
            fsm.fire(Trigger::ContextMerged);
            fsm.fire(Trigger::ReportGenerated);

            if fetch_ok && !cache_hit {
                if let Err(e) = self.repository.store_cached_report(tenant_id, request.property_id.as_deref(), &report).await {
                    tracing::warn!(query_id = %query_id, "failed to persist fresh report to cache: {e}");
                }
            }

            let data_source = if fetch_ok && !cache_hit { "fresh" } else { "cached" };

            // Step 9: result.
            yield Event::Result {
                payload: report,
                cached: cache_hit,
                metadata: serde_json::json!({
                    "query_id": query_id,
                    "duration_ms": (chrono::Utc::now() - start).num_milliseconds(),
                    "data_source": data_source,
                    "retrieval_confidence": retrieval.average_similarity,
                    "transitions_count": fsm.audit_trail().len(),
                }),
            };
        }
    }
}

fn empty_retrieval() -> RetrievalResult {
    RetrievalResult {
        citations: Vec::new(),
        average_similarity: 0.0,
        status_label: ConfidenceLabel::NoRelevantContext,
    }
}

fn shutdown_notice(rx: &mut broadcast::Receiver<ShutdownNotice>) -> Option<ShutdownNotice> {
    match rx.try_recv() {
        Ok(notice) => Some(notice),
        Err(_) => None,
    }
}

/// Tries a direct call to the analytics API first and only routes through
/// the request queue when the upstream signals exhaustion (spec §2, Python
/// ground truth `QueuedGA4Client.fetch_page_views`: `try: return await
/// self.resilient_client...; except (RateLimitError, QuotaExceededError):
/// enqueue...`). Any other upstream error propagates directly rather than
/// being queued.
fn build_fetch_worker(
    analytics: Arc<AnalyticsClient>,
    queue: Arc<RequestQueue>,
    worker_manager: Arc<QueueWorkerManager>,
    tenant_id: Uuid,
    user_id: Uuid,
    role: crate::models::Role,
    params: AnalyticsFetchParams,
    wait_timeout: Duration,
) -> Worker {
    Worker {
        name: "fetch".to_string(),
        call: Box::new(move |_cancel| {
            Box::pin(async move {
                use crate::error::OrchestratorError;

                match analytics.fetch(&params).await {
                    Ok(result) => serde_json::to_value(result)
                        .map_err(|e| OrchestratorError::InternalFailure(e.to_string())),
                    Err(e @ (OrchestratorError::UpstreamRateLimited(_) | OrchestratorError::UpstreamQuotaExhausted(_))) => {
                        tracing::info!(tenant_id = %tenant_id, "upstream analytics exhausted ({e}), falling back to queue");

                        worker_manager.ensure_worker(tenant_id).await;

                        let params_json = serde_json::to_value(&params)
                            .map_err(|e| OrchestratorError::InternalFailure(e.to_string()))?;
                        let request_id = queue
                            .enqueue(tenant_id, user_id, role, "analytics_fetch".to_string(), params_json, 50, 2, None)
                            .await;

                        match queue.wait_for_result(request_id, wait_timeout).await {
                            Some(record) if record.status == crate::models::QueueStatus::Completed => {
                                record.result.ok_or_else(|| {
                                    OrchestratorError::InternalFailure("completed request missing result".to_string())
                                })
                            }
                            Some(record) => Err(OrchestratorError::UpstreamTransient(
                                record.error.unwrap_or_else(|| "fetch failed".to_string()),
                            )),
                            None => Err(OrchestratorError::UpstreamTransient(
                                "fetch request vanished from the queue".to_string(),
                            )),
                        }
                    }
                    Err(e) => Err(e),
                }
            })
        }),
    }
}

fn build_embed_worker(embedding: Arc<EmbeddingClient>, query: String) -> Worker {
    Worker {
        name: "embed".to_string(),
        call: Box::new(move |_cancel| {
            Box::pin(async move {
                let vector = embedding.embed(&query).await?;
                serde_json::to_value(vector).map_err(|e| crate::error::OrchestratorError::InternalFailure(e.to_string()))
            })
        }),
    }
}

/// Transforms fetched rows into descriptive text, embeds it, and persists
/// it in the background — failures never affect the user-facing stream
/// (spec §4.7 step 7).
fn spawn_embedding_persistence(
    repository: Arc<dyn Repository>,
    tenant_id: Uuid,
    property_id: Option<String>,
    fetched: AnalyticsFetchResult,
    existing_embedding: Vec<f32>,
) {
    tokio::spawn(async move {
        for (idx, row) in fetched.rows.iter().enumerate() {
            let record_date = row
                .as_array()
                .and_then(|r| r.first())
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let source_record_id = format!("row-{idx}");
            if let Err(e) = repository
                .store_embedding(tenant_id, property_id.as_deref(), &source_record_id, &record_date, row, &existing_embedding)
                .await
            {
                tracing::warn!(tenant_id = %tenant_id, "background embedding persistence failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerRegistry;
    use crate::models::{Report, Role, TenantMembership};
    use futures_util::StreamExt;

    struct FakeRepository {
        cached: Option<Report>,
    }

    #[async_trait::async_trait]
    impl Repository for FakeRepository {
        async fn top_k_similar(
            &self,
            _embedding: &[f32],
            _k: usize,
            _min_similarity: f64,
            _scope: crate::models::FilterScope,
            _thresholds: (f64, f64, f64),
        ) -> Result<RetrievalResult, crate::error::OrchestratorError> {
            Ok(RetrievalResult {
                citations: Vec::new(),
                average_similarity: 0.9,
                status_label: ConfidenceLabel::HighConfidence,
            })
        }

        async fn lookup_cached_report(
            &self,
            _query: &str,
            _tenant_id: Uuid,
            _property_id: Option<&str>,
        ) -> Result<Option<Report>, crate::error::OrchestratorError> {
            Ok(self.cached.clone())
        }

        async fn store_cached_report(
            &self,
            _tenant_id: Uuid,
            _property_id: Option<&str>,
            _report: &Report,
        ) -> Result<(), crate::error::OrchestratorError> {
            Ok(())
        }

        async fn store_embedding(
            &self,
            _tenant_id: Uuid,
            _property_id: Option<&str>,
            _source_record_id: &str,
            _record_date: &str,
            _raw_values: &Value,
            _embedding: &[f32],
        ) -> Result<(), crate::error::OrchestratorError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MembershipLookup for FakeRepository {
        async fn membership(
            &self,
            user_id: Uuid,
            tenant_id: Uuid,
        ) -> Result<Option<TenantMembership>, crate::error::OrchestratorError> {
            Ok(Some(TenantMembership {
                user_id,
                tenant_id,
                role: Role::Owner,
                accepted_at: Some(chrono::Utc::now()),
            }))
        }
    }

    fn principal() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            issued_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            claims: serde_json::json!({}),
        }
    }

    fn test_orchestrator(cached: Option<Report>) -> (Arc<Orchestrator>, broadcast::Sender<ShutdownNotice>) {
        let fake = Arc::new(FakeRepository { cached });
        let config = Arc::new(Config::for_test());
        let queue = Arc::new(RequestQueue::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2,
            Duration::from_secs(3600),
        ));
        let embedding = Arc::new(EmbeddingClient::new(
            reqwest::Client::new(),
            "http://localhost:0".to_string(),
            Duration::from_millis(5),
            8,
        ));
        let analytics = Arc::new(AnalyticsClient::new(
            reqwest::Client::new(),
            "http://localhost:0".to_string(),
            Duration::from_millis(5),
        ));
        let worker_manager = Arc::new(QueueWorkerManager::new(
            queue.clone(),
            analytics.clone(),
            1,
            5,
            10,
            Duration::from_secs(30),
        ));
        let executor = Arc::new(ParallelExecutor::new(Arc::new(CircuitBreakerRegistry::new(3, Duration::from_secs(60), 1))));
        let (tx, _rx) = broadcast::channel(4);
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            fake.clone() as Arc<dyn Repository>,
            fake as Arc<dyn MembershipLookup>,
            queue,
            worker_manager,
            analytics,
            embedding,
            executor,
        ));
        (orchestrator, tx)
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_with_a_single_status_then_result() {
        let report = Report {
            answer_text: "cached answer".to_string(),
            charts: vec![],
            metric_cards: vec![],
            citations: vec![],
            confidence: 0.9,
            tenant_id: Uuid::nil(),
            query: "q".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let (orchestrator, tx) = test_orchestrator(Some(report));
        let principal = principal();
        let tenant_id = Uuid::new_v4();
        let request = QueryRequest { query: "q".to_string(), property_id: None, dimensions: None, metrics: None };

        let events: Vec<Event> = orchestrator
            .run_streaming(principal, tenant_id, request, tx.subscribe())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::Status { .. }));
        assert!(matches!(events[1], Event::Status { .. }));
        assert!(matches!(events[2], Event::Result { cached: true, .. }));
    }

    #[tokio::test]
    async fn unauthorized_tenant_emits_only_an_error() {
        struct NoMembership;
        #[async_trait::async_trait]
        impl Repository for NoMembership {
            async fn top_k_similar(&self, _: &[f32], _: usize, _: f64, _: crate::models::FilterScope, _: (f64, f64, f64)) -> Result<RetrievalResult, crate::error::OrchestratorError> {
                unreachable!()
            }
            async fn lookup_cached_report(&self, _: &str, _: Uuid, _: Option<&str>) -> Result<Option<Report>, crate::error::OrchestratorError> {
                unreachable!()
            }
            async fn store_cached_report(&self, _: Uuid, _: Option<&str>, _: &Report) -> Result<(), crate::error::OrchestratorError> {
                unreachable!()
            }
            async fn store_embedding(&self, _: Uuid, _: Option<&str>, _: &str, _: &str, _: &Value, _: &[f32]) -> Result<(), crate::error::OrchestratorError> {
                unreachable!()
            }
        }
        #[async_trait::async_trait]
        impl MembershipLookup for NoMembership {
            async fn membership(&self, _user_id: Uuid, _tenant_id: Uuid) -> Result<Option<TenantMembership>, crate::error::OrchestratorError> {
                Ok(None)
            }
        }

        let fake = Arc::new(NoMembership);
        let config = Arc::new(Config::for_test());
        let queue = Arc::new(RequestQueue::new(Duration::from_millis(1), Duration::from_millis(5), 2, Duration::from_secs(3600)));
        let embedding = Arc::new(EmbeddingClient::new(reqwest::Client::new(), "http://localhost:0".to_string(), Duration::from_millis(5), 8));
        let analytics = Arc::new(AnalyticsClient::new(reqwest::Client::new(), "http://localhost:0".to_string(), Duration::from_millis(5)));
        let worker_manager = Arc::new(QueueWorkerManager::new(queue.clone(), analytics.clone(), 1, 5, 10, Duration::from_secs(30)));
        let executor = Arc::new(ParallelExecutor::new(Arc::new(CircuitBreakerRegistry::new(3, Duration::from_secs(60), 1))));
        let (tx, _rx) = broadcast::channel(4);
        let orchestrator = Arc::new(Orchestrator::new(config, fake.clone(), fake, queue, worker_manager, analytics, embedding, executor));

        let request = QueryRequest { query: "q".to_string(), property_id: None, dimensions: None, metrics: None };
        let events: Vec<Event> = orchestrator
            .run_streaming(principal(), Uuid::new_v4(), request, tx.subscribe())
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Error { .. }));
    }
}
