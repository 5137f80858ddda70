//! Retry policy and failure handling.

use crate::job::{JobId, JobRecord, QueueName};
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use chrono::Utc;
use lexflow_core::{LexError, LexResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff policy for automatic retries.
///
/// The delay before attempt `n` becomes visible is
/// `base_delay_ms * 2^(n - 1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Backoff delay before the given attempt number runs.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exp = attempt - 1;
        let delay = if exp >= 63 {
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(1u64 << exp)
                .min(self.max_delay_ms)
        };
        Duration::from_millis(delay)
    }
}

/// Applies the retry policy when a job execution concludes in failure.
///
/// A failed execution either re-enters the queue behind a backoff gate
/// or, once the attempt bound is reached, lands terminally failed where
/// only a manual retry can revive it.
pub struct RetryController {
    store: Arc<dyn JobStore>,
    policy: RetryPolicy,
}

impl RetryController {
    /// Creates a controller over `store`.
    pub fn new(store: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Concludes a failed execution for the worker holding the lease.
    ///
    /// Returns `LeaseExpired` if `worker_id` no longer owns the job, so
    /// a worker that lost its lease cannot overwrite a reclaimed record.
    pub async fn handle_failure(
        &self,
        queue: QueueName,
        id: &JobId,
        worker_id: &str,
        reason: impl Into<String>,
    ) -> LexResult<JobRecord> {
        let policy = self.policy;
        let now = Utc::now();
        let worker = worker_id.to_string();
        let reason = reason.into();

        let updated = self
            .store
            .update(queue, id, &move |job| {
                if !job.is_leased_by(&worker) {
                    return Err(LexError::lease_expired(&job.id));
                }

                let attempts_after = job.attempts + 1;
                if attempts_after >= job.max_attempts {
                    job.fail_terminal(reason.clone(), now)
                } else {
                    let delay = policy.delay_for_attempt(attempts_after);
                    let visible =
                        now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    job.retry_with_backoff(visible)
                }
            })
            .await?;

        match updated.status {
            crate::job::JobStatus::Failed => {
                warn!(
                    job_id = %updated.id,
                    queue = %queue,
                    attempts = updated.attempts,
                    reason = %reason_of(&updated),
                    "Job failed terminally"
                );
                JobMetrics::job_failed(queue.as_str());
            }
            _ => {
                info!(
                    job_id = %updated.id,
                    queue = %queue,
                    attempts = updated.attempts,
                    visible_after = ?updated.visible_after,
                    "Job scheduled for retry"
                );
                JobMetrics::job_retried(queue.as_str());
            }
        }

        Ok(updated)
    }
}

fn reason_of(job: &JobRecord) -> &str {
    job.failure_reason.as_deref().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DocumentProcessingPayload, JobOptions, JobPayload, JobStatus};
    use crate::store::MemoryJobStore;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(1_000, 3_600_000);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(1_000, 10_000);

        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_millis(10_000));
    }

    async fn seed_claimed(store: &Arc<MemoryJobStore>, max_attempts: u32) -> JobRecord {
        let job = JobRecord::new(
            QueueName::DocumentProcessing,
            JobPayload::DocumentProcessing(DocumentProcessingPayload {
                doc_id: 7,
                file_name: None,
            }),
            JobOptions::new().with_max_attempts(max_attempts),
            3,
        )
        .unwrap();
        store.create(job).await.unwrap();
        store
            .claim(QueueName::DocumentProcessing, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_below_bound_requeues_with_backoff() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let claimed = seed_claimed(&store, 3).await;

        let controller = RetryController::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            RetryPolicy::new(1_000, 60_000),
        );
        let updated = controller
            .handle_failure(claimed.queue, &claimed.id, "w1", "flaky downstream")
            .await
            .unwrap();

        assert_eq!(updated.status, JobStatus::Waiting);
        assert_eq!(updated.attempts, 1);
        assert!(updated.visible_after.is_some());
        assert!(updated.visible_after.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_failure_at_bound_is_terminal() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let claimed = seed_claimed(&store, 1).await;

        let controller = RetryController::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            RetryPolicy::default(),
        );
        let updated = controller
            .handle_failure(claimed.queue, &claimed.id, "w1", "parse error")
            .await
            .unwrap();

        assert_eq!(updated.status, JobStatus::Failed);
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.failure_reason.as_deref(), Some("parse error"));
    }

    #[tokio::test]
    async fn test_exhausting_attempts_then_manual_retry_resets() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let claimed = seed_claimed(&store, 3).await;
        let controller = RetryController::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            RetryPolicy::new(0, 0),
        );

        let mut job = controller
            .handle_failure(claimed.queue, &claimed.id, "w1", "boom")
            .await
            .unwrap();

        for attempt in 2..=3 {
            let reclaimed = store
                .claim(QueueName::DocumentProcessing, "w1", Duration::from_secs(30))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reclaimed.id, job.id);
            job = controller
                .handle_failure(reclaimed.queue, &reclaimed.id, "w1", "boom")
                .await
                .unwrap();
            assert_eq!(job.attempts, attempt);
        }

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);

        let reset = store
            .update(job.queue, &job.id, &|record| record.reset_for_retry())
            .await
            .unwrap();
        assert_eq!(reset.status, JobStatus::Waiting);
        assert_eq!(reset.attempts, 0);
    }

    #[tokio::test]
    async fn test_stale_worker_cannot_conclude() {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let claimed = seed_claimed(&store, 3).await;
        let controller = RetryController::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            RetryPolicy::default(),
        );

        let err = controller
            .handle_failure(claimed.queue, &claimed.id, "other-worker", "late report")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LEASE_EXPIRED");

        let stored = store.get(claimed.queue, &claimed.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert_eq!(stored.attempts, 0);
    }
}
