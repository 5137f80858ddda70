//! Durable job record storage.
//!
//! A [`JobStore`] owns every job record and serializes mutations so the
//! state machine in [`JobRecord`] is never bypassed. Two backends ship:
//! an in-process map for tests and single-node deployments, and a Redis
//! backend for anything that must survive a restart.

mod memory;
mod redis;

pub use memory::MemoryJobStore;
pub use redis::{create_pool, RedisJobStore, RedisKeys};

use crate::job::{JobId, JobRecord, JobStatus, QueueName};
use crate::stats::QueueCounts;
use async_trait::async_trait;
use lexflow_core::LexResult;
use std::time::Duration;

/// A record mutation applied under the store's atomicity guarantee.
///
/// The store hands the closure a copy of the current record and persists
/// it only when the closure returns `Ok`. An `Err` leaves the stored
/// record untouched.
pub type Mutation<'a> = &'a (dyn Fn(&mut JobRecord) -> LexResult<()> + Send + Sync);

/// Backend-agnostic job record store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a freshly created job. Fails if the ID already exists.
    async fn create(&self, job: JobRecord) -> LexResult<JobRecord>;

    /// Fetches a job by queue and ID.
    async fn get(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord>;

    /// Applies `mutation` to the record atomically and returns the
    /// updated record.
    async fn update(
        &self,
        queue: QueueName,
        id: &JobId,
        mutation: Mutation<'_>,
    ) -> LexResult<JobRecord>;

    /// Lists jobs on a queue, optionally filtered by status.
    async fn list(&self, queue: QueueName, status: Option<JobStatus>) -> LexResult<Vec<JobRecord>>;

    /// Deletes a job and returns the removed record.
    async fn remove(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord>;

    /// Returns the next claimable job without mutating anything.
    async fn peek_next(&self, queue: QueueName) -> LexResult<Option<JobRecord>>;

    /// Atomically claims the next claimable job for `worker_id`.
    ///
    /// At most one caller receives any given job. Returns `None` when the
    /// queue has no claimable work.
    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> LexResult<Option<JobRecord>>;

    /// Returns per-status counts for a queue.
    async fn counts(&self, queue: QueueName) -> LexResult<QueueCounts>;

    /// Reverts every active job whose lease has expired back to waiting
    /// and returns the reclaimed records.
    async fn reclaim_expired(&self) -> LexResult<Vec<JobRecord>>;

    /// Probes backend connectivity.
    async fn ping(&self) -> LexResult<()>;
}
