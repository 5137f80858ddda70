//! Engine facade wiring the store, dispatcher, retry controller, and
//! stats aggregator behind one control surface.

use crate::cancel::CancelRegistry;
use crate::config::JobsConfig;
use crate::dispatcher::Dispatcher;
use crate::job::{JobId, JobOptions, JobPayload, JobRecord, JobStatus, QueueName};
use crate::metrics::JobMetrics;
use crate::retry::RetryController;
use crate::stats::{EngineHealth, QueueStats, StatsAggregator};
use crate::store::JobStore;
use crate::worker::{JobHandler, WorkerPool};
use async_trait::async_trait;
use lexflow_core::LexResult;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Control surface the monitoring API consumes.
///
/// Every mutation goes through the store's state machine, so callers can
/// treat error codes as the single source of truth for what went wrong.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Enqueues a job built from a raw payload body.
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: Value,
        options: JobOptions,
    ) -> LexResult<JobRecord>;

    /// Fetches one job.
    async fn job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord>;

    /// Lists jobs on a queue, optionally filtered by status.
    async fn list_jobs(
        &self,
        queue: QueueName,
        status: Option<JobStatus>,
    ) -> LexResult<Vec<JobRecord>>;

    /// Manually retries a terminally failed job, resetting its attempts.
    async fn retry_job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord>;

    /// Removes a job. Removing an active job also signals cancellation
    /// to the executing worker and voids its lease.
    async fn remove_job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord>;

    /// Snapshots all queue counts.
    async fn stats(&self) -> LexResult<QueueStats>;

    /// Reports engine health.
    async fn health(&self) -> EngineHealth;
}

/// The job engine.
pub struct JobEngine {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    retry: Arc<RetryController>,
    stats: StatsAggregator,
    cancels: Arc<CancelRegistry>,
    config: JobsConfig,
}

impl JobEngine {
    /// Builds an engine over `store` with the given configuration.
    pub fn new(store: Arc<dyn JobStore>, config: JobsConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            config.lease.duration(),
            config.lease.sweep_interval(),
        ));
        let retry = Arc::new(RetryController::new(
            Arc::clone(&store),
            config.retry_policy(),
        ));
        let stats = StatsAggregator::new(
            Arc::clone(&store),
            config.health.failed_ratio_threshold,
        );

        Self {
            store,
            dispatcher,
            retry,
            stats,
            cancels: Arc::new(CancelRegistry::new()),
            config,
        }
    }

    /// The dispatcher, for spawning the lease sweeper.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Builds a worker pool for `queue` running `handler`.
    #[must_use]
    pub fn worker_pool(&self, queue: QueueName, handler: JobHandler) -> WorkerPool {
        WorkerPool::new(
            queue,
            handler,
            Arc::clone(&self.store),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.retry),
            Arc::clone(&self.cancels),
            self.config.tuning(queue).clone(),
            self.config.worker.clone(),
        )
    }
}

#[async_trait]
impl JobControl for JobEngine {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: Value,
        options: JobOptions,
    ) -> LexResult<JobRecord> {
        let payload = JobPayload::from_queue_value(queue, payload)?;
        let default_max_attempts = self.config.tuning(queue).max_attempts;
        let job = JobRecord::new(queue, payload, options, default_max_attempts)?;
        let job = self.store.create(job).await?;

        info!(job_id = %job.id, queue = %queue, priority = job.priority, "Enqueued job");
        JobMetrics::job_enqueued(queue.as_str());
        Ok(job)
    }

    async fn job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        self.store.get(queue, id).await
    }

    async fn list_jobs(
        &self,
        queue: QueueName,
        status: Option<JobStatus>,
    ) -> LexResult<Vec<JobRecord>> {
        self.store.list(queue, status).await
    }

    async fn retry_job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        let job = self
            .store
            .update(queue, id, &|record| record.reset_for_retry())
            .await?;
        info!(job_id = %job.id, queue = %queue, "Manually retried job");
        Ok(job)
    }

    async fn remove_job(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        let removed = self.store.remove(queue, id).await?;
        if removed.status == JobStatus::Active && self.cancels.cancel(id) {
            info!(job_id = %id, queue = %queue, "Signalled cancellation to executing worker");
        }
        info!(job_id = %id, queue = %queue, status = %removed.status, "Removed job");
        JobMetrics::job_removed(queue.as_str());
        Ok(removed)
    }

    async fn stats(&self) -> LexResult<QueueStats> {
        let stats = self.stats.snapshot().await?;
        for queue in QueueName::ALL {
            let counts = stats.counts(queue);
            JobMetrics::queue_depth(queue.as_str(), counts.waiting, counts.active);
        }
        Ok(stats)
    }

    async fn health(&self) -> EngineHealth {
        self.stats.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::HealthStatus;
    use crate::store::MemoryJobStore;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> JobEngine {
        let store = Arc::new(MemoryJobStore::new(60_000));
        JobEngine::new(store, JobsConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch() {
        let engine = engine();
        let job = engine
            .enqueue(
                QueueName::DocumentProcessing,
                json!({ "docId": 42, "fileName": "brief.pdf" }),
                JobOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.max_attempts, 3);

        let fetched = engine.job(job.queue, &job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_payload() {
        let engine = engine();
        let err = engine
            .enqueue(
                QueueName::DocumentProcessing,
                json!({ "wrong": "shape" }),
                JobOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_retry_requires_failed_status() {
        let engine = engine();
        let job = engine
            .enqueue(
                QueueName::UserRequests,
                json!({ "userId": "u1", "action": "export" }),
                JobOptions::default(),
            )
            .await
            .unwrap();

        let err = engine.retry_job(job.queue, &job.id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");

        engine
            .store
            .update(job.queue, &job.id, &|record| {
                record.begin("w1", Duration::from_secs(30), Utc::now())?;
                record.fail_terminal("boom", Utc::now())
            })
            .await
            .unwrap();

        let retried = engine.retry_job(job.queue, &job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Waiting);
        assert_eq!(retried.attempts, 0);
    }

    #[tokio::test]
    async fn test_remove_active_job_signals_cancellation() {
        let engine = engine();
        let job = engine
            .enqueue(
                QueueName::AiAnalysis,
                json!({ "docId": 7, "analysisType": "summary" }),
                JobOptions::default(),
            )
            .await
            .unwrap();

        engine
            .store
            .claim(job.queue, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let flag = engine.cancels.register(&job.id);

        let removed = engine.remove_job(job.queue, &job.id).await.unwrap();
        assert_eq!(removed.status, JobStatus::Active);
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));

        let err = engine.job(job.queue, &job.id).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_stats_identity_holds() {
        let engine = engine();
        let mut created = Vec::new();
        for i in 0..5 {
            created.push(
                engine
                    .enqueue(
                        QueueName::DocumentProcessing,
                        json!({ "docId": i }),
                        JobOptions::default(),
                    )
                    .await
                    .unwrap(),
            );
        }

        let claimed = engine
            .store
            .claim(QueueName::DocumentProcessing, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        engine
            .store
            .update(claimed.queue, &claimed.id, &|record| {
                record.complete(json!({}), Utc::now())
            })
            .await
            .unwrap();

        engine
            .remove_job(QueueName::DocumentProcessing, &created[4].id)
            .await
            .unwrap();

        let stats = engine.stats().await.unwrap();
        let counts = stats.document_processing;
        // 5 created, 1 removed
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.waiting, 3);
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn test_health_reports_healthy_on_empty_engine() {
        let engine = engine();
        let health = engine.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
