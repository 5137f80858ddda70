//! In-process job store backed by a map.
//!
//! Claim ordering and lease accounting live in the record's own state
//! machine; this backend only supplies atomicity, which a single write
//! lock over the map provides. Lock guards are never held across awaits.

use crate::job::{JobId, JobRecord, JobStatus, QueueName};
use crate::stats::QueueCounts;
use crate::store::{JobStore, Mutation};
use async_trait::async_trait;
use chrono::Utc;
use lexflow_core::{LexError, LexResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// In-memory [`JobStore`] for tests and single-node deployments.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<(QueueName, JobId), JobRecord>>,
    priority_boost_ms: i64,
}

impl MemoryJobStore {
    /// Creates an empty store.
    ///
    /// `priority_boost_ms` feeds the anti-starvation claim ordering, see
    /// [`JobRecord::ordering_score`].
    #[must_use]
    pub fn new(priority_boost_ms: i64) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            priority_boost_ms,
        }
    }

    fn next_claimable(
        &self,
        jobs: &HashMap<(QueueName, JobId), JobRecord>,
        queue: QueueName,
        now: chrono::DateTime<Utc>,
    ) -> Option<JobId> {
        jobs.values()
            .filter(|job| job.queue == queue && job.is_claimable(now))
            .min_by(|a, b| {
                a.ordering_score(self.priority_boost_ms)
                    .cmp(&b.ordering_score(self.priority_boost_ms))
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|job| job.id.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: JobRecord) -> LexResult<JobRecord> {
        let mut jobs = self.jobs.write();
        let key = (job.queue, job.id.clone());
        if jobs.contains_key(&key) {
            return Err(LexError::invalid_state(format!(
                "Job {} already exists",
                job.id
            )));
        }
        jobs.insert(key, job.clone());
        Ok(job)
    }

    async fn get(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        self.jobs
            .read()
            .get(&(queue, id.clone()))
            .cloned()
            .ok_or_else(|| LexError::not_found("Job", id))
    }

    async fn update(
        &self,
        queue: QueueName,
        id: &JobId,
        mutation: Mutation<'_>,
    ) -> LexResult<JobRecord> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get(&(queue, id.clone()))
            .ok_or_else(|| LexError::not_found("Job", id))?;

        let mut updated = record.clone();
        mutation(&mut updated)?;
        jobs.insert((queue, id.clone()), updated.clone());
        Ok(updated)
    }

    async fn list(&self, queue: QueueName, status: Option<JobStatus>) -> LexResult<Vec<JobRecord>> {
        let jobs = self.jobs.read();
        let mut matched: Vec<JobRecord> = jobs
            .values()
            .filter(|job| job.queue == queue && status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn remove(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        self.jobs
            .write()
            .remove(&(queue, id.clone()))
            .ok_or_else(|| LexError::not_found("Job", id))
    }

    async fn peek_next(&self, queue: QueueName) -> LexResult<Option<JobRecord>> {
        let now = Utc::now();
        let jobs = self.jobs.read();
        let next = self.next_claimable(&jobs, queue, now);
        Ok(next.and_then(|id| jobs.get(&(queue, id)).cloned()))
    }

    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> LexResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        let Some(id) = self.next_claimable(&jobs, queue, now) else {
            return Ok(None);
        };

        let record = jobs
            .get_mut(&(queue, id))
            .ok_or_else(|| LexError::internal("claimed job vanished under lock"))?;
        record.begin(worker_id, lease, now)?;
        Ok(Some(record.clone()))
    }

    async fn counts(&self, queue: QueueName) -> LexResult<QueueCounts> {
        let jobs = self.jobs.read();
        let mut counts = QueueCounts::default();
        for job in jobs.values().filter(|job| job.queue == queue) {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn reclaim_expired(&self) -> LexResult<Vec<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let mut reclaimed = Vec::new();

        for record in jobs.values_mut() {
            let expired = record.status == JobStatus::Active
                && record.lease_expires_at.map_or(false, |e| e <= now);
            if expired {
                record.expire_lease(now)?;
                reclaimed.push(record.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn ping(&self) -> LexResult<()> {
        Ok(())
    }
}
