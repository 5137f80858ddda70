//! Worker pool executing jobs against a caller-supplied handler.

use crate::cancel::CancelRegistry;
use crate::config::{QueueTuning, WorkerConfig};
use crate::dispatcher::Dispatcher;
use crate::job::{JobId, JobPayload, QueueName};
use crate::metrics::JobMetrics;
use crate::retry::RetryController;
use crate::store::JobStore;
use chrono::Utc;
use lexflow_core::{BoxFuture, LexError, LexResult};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Job handler function type.
///
/// Handlers receive their queue's payload variant and a progress handle,
/// and resolve to the job's result value or an error.
pub type JobHandler = Arc<dyn Fn(JobPayload, ProgressHandle) -> BoxFuture<'static, Value> + Send + Sync>;

/// Wraps an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> JobHandler
where
    F: Fn(JobPayload, ProgressHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LexResult<Value>> + Send + 'static,
{
    Arc::new(move |payload, progress| Box::pin(f(payload, progress)))
}

/// Handle a running handler uses to report progress and observe
/// cancellation.
///
/// Progress writes carry the lease-owner guard: once the worker loses its
/// lease the report fails with `LeaseExpired` instead of touching a
/// record another worker may now own.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: JobId,
    queue: QueueName,
    worker_id: String,
    store: Arc<dyn JobStore>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressHandle {
    /// Records progress for the job. Progress never decreases.
    pub async fn report(&self, percent: u8) -> LexResult<()> {
        let worker = self.worker_id.clone();
        self.store
            .update(self.queue, &self.job_id, &move |job| {
                if !job.is_leased_by(&worker) {
                    return Err(LexError::lease_expired(&job.id));
                }
                job.set_progress(percent)
            })
            .await?;
        Ok(())
    }

    /// Returns true once the job has been cancelled. Cooperative
    /// handlers should bail out when they observe this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The job being executed.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

/// Worker pool for one queue.
///
/// Runs up to `concurrency` handler executions at once. Each execution
/// claims a job under a lease, renews the lease at half-life while the
/// handler runs, and concludes through the retry controller on failure.
pub struct WorkerPool {
    id: String,
    queue: QueueName,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    retry: Arc<RetryController>,
    cancels: Arc<CancelRegistry>,
    handler: JobHandler,
    tuning: QueueTuning,
    worker_config: WorkerConfig,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a new worker pool for `queue`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueName,
        handler: JobHandler,
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        retry: Arc<RetryController>,
        cancels: Arc<CancelRegistry>,
        tuning: QueueTuning,
        worker_config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("pool-{}-{}", queue, Uuid::new_v4()),
            queue,
            store,
            dispatcher,
            retry,
            cancels,
            handler,
            tuning,
            worker_config,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the pool until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> LexResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LexError::invalid_state(format!(
                "Worker pool {} already running",
                self.id
            )));
        }

        info!(
            pool_id = %self.id,
            queue = %self.queue,
            concurrency = self.tuning.concurrency,
            "Starting worker pool"
        );

        let semaphore = Arc::new(Semaphore::new(self.tuning.concurrency));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = self.worker_config.poll_interval();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(pool_id = %self.id, "Received shutdown signal");
                    break;
                }

                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };

                    let worker_id = format!("{}-{}", self.id, Uuid::new_v4());
                    match self.dispatcher.claim(self.queue, &worker_id).await {
                        Ok(Some(job)) => {
                            self.spawn_execution(job, worker_id, permit);
                            // Slot freed up for another claim right away.
                            continue;
                        }
                        Ok(None) => drop(permit),
                        Err(err) => {
                            error!(pool_id = %self.id, error = %err, "Claim failed");
                            drop(permit);
                        }
                    }

                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(pool_id = %self.id, "Received shutdown signal");
                            break;
                        }
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        // Give in-flight handlers a grace period to conclude.
        info!(pool_id = %self.id, "Waiting for workers to finish...");
        let concurrency = self.tuning.concurrency;
        let _ = timeout(self.worker_config.shutdown_timeout(), async {
            while semaphore.available_permits() < concurrency {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        self.running.store(false, Ordering::SeqCst);

        info!(
            pool_id = %self.id,
            processed = self.jobs_processed.load(Ordering::Relaxed),
            failed = self.jobs_failed.load(Ordering::Relaxed),
            "Worker pool stopped"
        );

        Ok(())
    }

    fn spawn_execution(
        &self,
        job: crate::job::JobRecord,
        worker_id: String,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let queue = self.queue;
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let retry = Arc::clone(&self.retry);
        let cancels = Arc::clone(&self.cancels);
        let handler = Arc::clone(&self.handler);
        let handler_timeout = self.tuning.handler_timeout();
        let jobs_processed = Arc::clone(&self.jobs_processed);
        let jobs_failed = Arc::clone(&self.jobs_failed);

        tokio::spawn(
            async move {
                let job_id = job.id.clone();
                debug!(job_id = %job_id, queue = %queue, worker_id = %worker_id, "Processing job");

                let cancelled = cancels.register(&job_id);
                let progress = ProgressHandle {
                    job_id: job_id.clone(),
                    queue,
                    worker_id: worker_id.clone(),
                    store: Arc::clone(&store),
                    cancelled,
                };

                // Renew the lease at half-life so long handlers are not
                // falsely reclaimed.
                let renew_task = {
                    let dispatcher = Arc::clone(&dispatcher);
                    let job_id = job_id.clone();
                    let worker = worker_id.clone();
                    let period = (dispatcher.lease_duration() / 2).max(Duration::from_millis(100));
                    tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(period);
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            if let Err(err) = dispatcher.renew_lease(queue, &job_id, &worker).await {
                                debug!(job_id = %job_id, error = %err, "Stopping lease renewal");
                                break;
                            }
                        }
                    })
                };

                let started = Instant::now();
                let outcome = timeout(
                    handler_timeout,
                    (handler)(job.payload.clone(), progress.clone()),
                )
                .await;

                renew_task.abort();
                cancels.unregister(&job_id);

                match outcome {
                    Ok(Ok(result)) => {
                        let worker = worker_id.clone();
                        let now = Utc::now();
                        let completed = store
                            .update(queue, &job_id, &move |record| {
                                if !record.is_leased_by(&worker) {
                                    return Err(LexError::lease_expired(&record.id));
                                }
                                record.complete(result.clone(), now)
                            })
                            .await;

                        match completed {
                            Ok(_) => {
                                debug!(job_id = %job_id, queue = %queue, "Job completed");
                                JobMetrics::job_completed(
                                    queue.as_str(),
                                    started.elapsed().as_secs_f64(),
                                );
                                jobs_processed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) if discardable(&err) => {
                                debug!(job_id = %job_id, error = %err, "Discarded late completion");
                            }
                            Err(err) => {
                                error!(job_id = %job_id, error = %err, "Failed to record completion");
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        warn!(job_id = %job_id, queue = %queue, error = %err, "Handler failed");
                        jobs_failed.fetch_add(1, Ordering::Relaxed);
                        conclude_failure(&retry, queue, &job_id, &worker_id, err.to_string()).await;
                    }
                    Err(_) => {
                        warn!(
                            job_id = %job_id,
                            queue = %queue,
                            timeout_secs = handler_timeout.as_secs(),
                            "Handler timed out"
                        );
                        jobs_failed.fetch_add(1, Ordering::Relaxed);
                        let reason =
                            format!("Timeout: handler exceeded {}s", handler_timeout.as_secs());
                        conclude_failure(&retry, queue, &job_id, &worker_id, reason).await;
                    }
                }

                drop(permit);
            }
            .instrument(tracing::info_span!("worker")),
        );
    }

    /// Signal the pool to stop.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        let _ = self.shutdown_tx.send(());
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs completed by this pool.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Handler failures observed by this pool.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// The pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

fn discardable(err: &LexError) -> bool {
    matches!(
        err,
        LexError::LeaseExpired { .. } | LexError::NotFound { .. }
    )
}

async fn conclude_failure(
    retry: &RetryController,
    queue: QueueName,
    job_id: &JobId,
    worker_id: &str,
    reason: String,
) {
    match retry.handle_failure(queue, job_id, worker_id, reason).await {
        Ok(_) => {}
        Err(err) if discardable(&err) => {
            debug!(job_id = %job_id, error = %err, "Discarded late failure report");
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "Failed to record failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{
        DocumentProcessingPayload, JobOptions, JobPayload, JobRecord, JobStatus,
    };
    use crate::retry::RetryPolicy;
    use crate::store::MemoryJobStore;
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryJobStore>,
        pool: Arc<WorkerPool>,
        cancels: Arc<CancelRegistry>,
    }

    fn harness(handler: JobHandler, tuning: QueueTuning) -> Harness {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let store_dyn: Arc<dyn JobStore> = Arc::clone(&store) as Arc<dyn JobStore>;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store_dyn),
            Duration::from_secs(30),
            Duration::from_millis(50),
        ));
        let retry = Arc::new(RetryController::new(
            Arc::clone(&store_dyn),
            RetryPolicy::new(0, 0),
        ));
        let cancels = Arc::new(CancelRegistry::new());
        let worker_config = WorkerConfig {
            poll_interval_ms: 10,
            shutdown_timeout_secs: 5,
        };
        let pool = Arc::new(WorkerPool::new(
            QueueName::DocumentProcessing,
            handler,
            store_dyn,
            dispatcher,
            retry,
            Arc::clone(&cancels),
            tuning,
            worker_config,
        ));
        Harness {
            store,
            pool,
            cancels,
        }
    }

    fn doc_job(max_attempts: u32) -> JobRecord {
        JobRecord::new(
            QueueName::DocumentProcessing,
            JobPayload::DocumentProcessing(DocumentProcessingPayload {
                doc_id: 42,
                file_name: Some("contract.pdf".to_string()),
            }),
            JobOptions::new().with_max_attempts(max_attempts),
            3,
        )
        .unwrap()
    }

    async fn wait_for_status(
        store: &MemoryJobStore,
        job: &JobRecord,
        status: JobStatus,
    ) -> JobRecord {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let current = store.get(job.queue, &job.id).await.unwrap();
            if current.status == status {
                return current;
            }
        }
        panic!("job never reached {:?}", status);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pool_runs_job_to_completion() {
        let handler = handler_fn(|payload, progress: ProgressHandle| async move {
            let JobPayload::DocumentProcessing(doc) = payload else {
                return Err(LexError::handler("unexpected payload variant"));
            };
            progress.report(50).await?;
            Ok(json!({ "docId": doc.doc_id, "extractedText": "..." }))
        });

        let h = harness(handler, QueueTuning::default());
        let job = h.store.create(doc_job(3)).await.unwrap();

        let run = {
            let pool = Arc::clone(&h.pool);
            tokio::spawn(async move { pool.start().await })
        };

        let done = wait_for_status(&h.store, &job, JobStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert_eq!(done.result.as_ref().unwrap()["docId"], json!(42));
        assert!(done.lease_owner.is_none());

        h.pool.stop();
        run.await.unwrap().unwrap();
        assert_eq!(h.pool.jobs_processed(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_handler_exhausts_attempts() {
        let handler = handler_fn(|_payload, _progress| async move {
            Err::<Value, _>(LexError::handler("document is corrupt"))
        });

        let h = harness(handler, QueueTuning::default());
        let job = h.store.create(doc_job(3)).await.unwrap();

        let run = {
            let pool = Arc::clone(&h.pool);
            tokio::spawn(async move { pool.start().await })
        };

        let failed = wait_for_status(&h.store, &job, JobStatus::Failed).await;
        assert_eq!(failed.attempts, 3);
        assert!(failed
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("document is corrupt"));

        h.pool.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slow_handler_fails_with_timeout() {
        let handler = handler_fn(|_payload, _progress| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        });

        let tuning = QueueTuning {
            concurrency: 1,
            max_attempts: 1,
            handler_timeout_secs: 0,
        };
        let h = harness(handler, tuning);
        let job = h.store.create(doc_job(1)).await.unwrap();

        let run = {
            let pool = Arc::clone(&h.pool);
            tokio::spawn(async move { pool.start().await })
        };

        let failed = wait_for_status(&h.store, &job, JobStatus::Failed).await;
        assert!(failed.failure_reason.as_deref().unwrap().contains("Timeout"));

        h.pool.stop();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_flag_reaches_handler() {
        let handler = handler_fn(|_payload, progress: ProgressHandle| async move {
            for _ in 0..500 {
                if progress.is_cancelled() {
                    return Err(LexError::handler("cancelled"));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(json!({}))
        });

        let h = harness(handler, QueueTuning::default());
        let job = h.store.create(doc_job(1)).await.unwrap();

        let run = {
            let pool = Arc::clone(&h.pool);
            tokio::spawn(async move { pool.start().await })
        };

        wait_for_status(&h.store, &job, JobStatus::Active).await;
        assert!(h.cancels.cancel(&job.id));

        let failed = wait_for_status(&h.store, &job, JobStatus::Failed).await;
        assert!(failed.failure_reason.as_deref().unwrap().contains("cancelled"));

        h.pool.stop();
        run.await.unwrap().unwrap();
    }
}
