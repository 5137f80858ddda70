//! Job dispatch and lease management.

use crate::job::{JobId, JobRecord, QueueName};
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use chrono::Utc;
use lexflow_core::LexResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hands jobs to workers under a visibility-timeout lease.
///
/// A claim atomically moves the job to active and stamps the lease; the
/// background sweeper reverts any active job whose lease expired without
/// a conclusion, so a crashed worker can never strand work.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    lease_duration: Duration,
    sweep_interval: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher over `store`.
    pub fn new(store: Arc<dyn JobStore>, lease_duration: Duration, sweep_interval: Duration) -> Self {
        Self {
            store,
            lease_duration,
            sweep_interval,
        }
    }

    /// Lease duration granted on claim and renewal.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Returns the next job `claim` would hand out, without claiming it.
    pub async fn peek_next(&self, queue: QueueName) -> LexResult<Option<JobRecord>> {
        self.store.peek_next(queue).await
    }

    /// Claims the next claimable job on `queue` for `worker_id`.
    pub async fn claim(&self, queue: QueueName, worker_id: &str) -> LexResult<Option<JobRecord>> {
        let claimed = self
            .store
            .claim(queue, worker_id, self.lease_duration)
            .await?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, queue = %queue, worker_id = %worker_id, "Dispatched job");
            JobMetrics::job_claimed(queue.as_str());
        }
        Ok(claimed)
    }

    /// Extends the lease for a worker still executing a job.
    ///
    /// Returns `LeaseExpired` when the worker no longer owns the job.
    pub async fn renew_lease(
        &self,
        queue: QueueName,
        id: &JobId,
        worker_id: &str,
    ) -> LexResult<JobRecord> {
        let now = Utc::now();
        let lease = self.lease_duration;
        let worker = worker_id.to_string();
        self.store
            .update(queue, id, &move |job| job.renew_lease(&worker, lease, now))
            .await
    }

    /// Spawns the lease sweeper task.
    ///
    /// Runs until a shutdown signal arrives, reclaiming expired leases
    /// every sweep interval.
    pub fn spawn_sweeper(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let sweep_interval = self.sweep_interval;

        tokio::spawn(async move {
            info!(interval = ?sweep_interval, "Lease sweeper started");
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.reclaim_expired().await {
                            Ok(reclaimed) if !reclaimed.is_empty() => {
                                for job in &reclaimed {
                                    warn!(
                                        job_id = %job.id,
                                        queue = %job.queue,
                                        attempts = job.attempts,
                                        "Reclaimed expired lease"
                                    );
                                }
                                JobMetrics::leases_reclaimed(reclaimed.len() as u64);
                            }
                            Ok(_) => {}
                            Err(err) => {
                                error!(error = %err, "Lease sweep failed");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Lease sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DocumentProcessingPayload, JobOptions, JobPayload, JobStatus};
    use crate::store::MemoryJobStore;

    fn doc_job() -> JobRecord {
        JobRecord::new(
            QueueName::DocumentProcessing,
            JobPayload::DocumentProcessing(DocumentProcessingPayload {
                doc_id: 9,
                file_name: None,
            }),
            JobOptions::default(),
            3,
        )
        .unwrap()
    }

    fn dispatcher(store: Arc<MemoryJobStore>, lease: Duration) -> Dispatcher {
        Dispatcher::new(store, lease, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_claim_stamps_lease() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        store.create(doc_job()).await.unwrap();
        let dispatcher = dispatcher(Arc::clone(&store), Duration::from_secs(30));

        let job = dispatcher
            .claim(QueueName::DocumentProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.is_leased_by("w1"));

        let empty = dispatcher
            .claim(QueueName::DocumentProcessing, "w2")
            .await
            .unwrap();
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_peek_leaves_job_claimable() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        store.create(doc_job()).await.unwrap();
        let dispatcher = dispatcher(Arc::clone(&store), Duration::from_secs(30));

        let peeked = dispatcher
            .peek_next(QueueName::DocumentProcessing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peeked.status, JobStatus::Waiting);

        let claimed = dispatcher
            .claim(QueueName::DocumentProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, peeked.id);
    }

    #[tokio::test]
    async fn test_renew_extends_lease_for_owner_only() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        store.create(doc_job()).await.unwrap();
        let dispatcher = dispatcher(Arc::clone(&store), Duration::from_secs(30));

        let job = dispatcher
            .claim(QueueName::DocumentProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        let first_expiry = job.lease_expires_at.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let renewed = dispatcher
            .renew_lease(job.queue, &job.id, "w1")
            .await
            .unwrap();
        assert!(renewed.lease_expires_at.unwrap() >= first_expiry);

        let err = dispatcher
            .renew_lease(job.queue, &job.id, "w2")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LEASE_EXPIRED");
    }

    #[tokio::test]
    async fn test_sweeper_requeues_expired_lease() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        store.create(doc_job()).await.unwrap();
        let dispatcher = dispatcher(Arc::clone(&store), Duration::from_millis(0));

        let job = dispatcher
            .claim(QueueName::DocumentProcessing, "w1")
            .await
            .unwrap()
            .unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = dispatcher.spawn_sweeper(shutdown_tx.subscribe());

        let mut reverted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let current = store.get(job.queue, &job.id).await.unwrap();
            if current.status == JobStatus::Waiting {
                assert_eq!(current.attempts, 1);
                reverted = true;
                break;
            }
        }
        assert!(reverted, "sweeper never reclaimed the expired lease");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
