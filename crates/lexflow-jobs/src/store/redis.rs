//! Redis-backed job store.
//!
//! Records live as JSON strings under per-job keys. Per-queue index
//! structures drive claiming: a waiting zset scored by claim order, a
//! delayed zset scored by visibility time, an active hash keyed by job
//! ID, and completed/failed zsets scored by finish time. ZPOPMIN makes
//! claims atomic across processes; record mutations take a short-lived
//! per-job lock so read-modify-write cycles never interleave.

use crate::config::RedisConfig;
use crate::job::{JobId, JobRecord, JobStatus, QueueName};
use crate::stats::QueueCounts;
use crate::store::{JobStore, Mutation};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Pool, Runtime};
use lexflow_core::{LexError, LexResult};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOCK_TTL_MS: u64 = 5_000;
const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY_DELAY_MS: u64 = 20;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> LexResult<Pool> {
    info!("Creating Redis connection pool for job store...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| LexError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| LexError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for the job store.
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Waiting jobs (sorted set: job ID scored by claim order).
    pub fn waiting(&self, queue: &str) -> String {
        format!("{}:waiting:{}", self.prefix, queue)
    }

    /// Backoff-gated jobs (sorted set: job ID scored by visibility time).
    pub fn delayed(&self, queue: &str) -> String {
        format!("{}:delayed:{}", self.prefix, queue)
    }

    /// Active jobs (hash: job ID -> worker ID).
    pub fn active(&self, queue: &str) -> String {
        format!("{}:active:{}", self.prefix, queue)
    }

    /// Completed jobs (sorted set: job ID scored by finish time).
    pub fn completed(&self, queue: &str) -> String {
        format!("{}:completed:{}", self.prefix, queue)
    }

    /// Terminally failed jobs (sorted set: job ID scored by finish time).
    pub fn failed(&self, queue: &str) -> String {
        format!("{}:failed:{}", self.prefix, queue)
    }

    /// Job record (string: JSON).
    pub fn job(&self, queue: &str, job_id: &str) -> String {
        format!("{}:job:{}:{}", self.prefix, queue, job_id)
    }

    /// Per-record mutation lock.
    pub fn lock(&self, queue: &str, job_id: &str) -> String {
        format!("{}:lock:{}:{}", self.prefix, queue, job_id)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("lexflow:jobs")
    }
}

/// Redis-backed [`JobStore`].
pub struct RedisJobStore {
    pool: Pool,
    keys: RedisKeys,
    priority_boost_ms: i64,
}

impl RedisJobStore {
    /// Create a new Redis job store.
    pub fn new(pool: Pool, key_prefix: impl Into<String>, priority_boost_ms: i64) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            priority_boost_ms,
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> LexResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    fn waiting_score(&self, record: &JobRecord) -> f64 {
        record.ordering_score(self.priority_boost_ms) as f64
    }

    async fn load(
        &self,
        conn: &mut deadpool_redis::Connection,
        queue: QueueName,
        id: &JobId,
    ) -> LexResult<JobRecord> {
        let json: Option<String> = conn.get(self.keys.job(queue.as_str(), id.as_str())).await?;
        let json = json.ok_or_else(|| LexError::not_found("Job", id))?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn save(
        &self,
        conn: &mut deadpool_redis::Connection,
        record: &JobRecord,
    ) -> LexResult<()> {
        let json = serde_json::to_string(record)?;
        let _: () = conn
            .set(self.keys.job(record.queue.as_str(), record.id.as_str()), json)
            .await?;
        Ok(())
    }

    /// Moves the record's ID into the index structure matching its
    /// current status, removing it from every other one.
    async fn reindex(
        &self,
        conn: &mut deadpool_redis::Connection,
        record: &JobRecord,
    ) -> LexResult<()> {
        let queue = record.queue.as_str();
        let id = record.id.as_str();

        let mut pipe = redis::pipe();
        pipe.zrem(self.keys.waiting(queue), id)
            .zrem(self.keys.delayed(queue), id)
            .hdel(self.keys.active(queue), id)
            .zrem(self.keys.completed(queue), id)
            .zrem(self.keys.failed(queue), id);

        match record.status {
            JobStatus::Waiting => match record.visible_after {
                Some(visible) if visible > Utc::now() => {
                    pipe.zadd(
                        self.keys.delayed(queue),
                        id,
                        visible.timestamp_millis() as f64,
                    );
                }
                _ => {
                    pipe.zadd(self.keys.waiting(queue), id, self.waiting_score(record));
                }
            },
            JobStatus::Active => {
                pipe.hset(
                    self.keys.active(queue),
                    id,
                    record.lease_owner.as_deref().unwrap_or_default(),
                );
            }
            JobStatus::Completed => {
                pipe.zadd(
                    self.keys.completed(queue),
                    id,
                    record
                        .finished_at
                        .unwrap_or_else(Utc::now)
                        .timestamp_millis() as f64,
                );
            }
            JobStatus::Failed => {
                pipe.zadd(
                    self.keys.failed(queue),
                    id,
                    record
                        .finished_at
                        .unwrap_or_else(Utc::now)
                        .timestamp_millis() as f64,
                );
            }
        }

        let _: () = pipe.query_async(&mut **conn).await?;
        Ok(())
    }

    /// Move jobs whose backoff gate has passed into the waiting zset.
    async fn promote_due(
        &self,
        conn: &mut deadpool_redis::Connection,
        queue: QueueName,
    ) -> LexResult<u64> {
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(self.keys.delayed(queue.as_str()), 0i64, now)
            .await?;

        let mut moved = 0u64;
        for id in due {
            let job_id = JobId::from(id.as_str());
            match self.load(conn, queue, &job_id).await {
                Ok(record) => {
                    let _: () = redis::pipe()
                        .zrem(self.keys.delayed(queue.as_str()), &id)
                        .zadd(
                            self.keys.waiting(queue.as_str()),
                            &id,
                            self.waiting_score(&record),
                        )
                        .query_async(&mut **conn)
                        .await?;
                    moved += 1;
                    debug!(job_id = %id, queue = %queue, "Promoted delayed job");
                }
                Err(LexError::NotFound { .. }) => {
                    let _: () = conn.zrem(self.keys.delayed(queue.as_str()), &id).await?;
                    warn!(job_id = %id, queue = %queue, "Dropped dangling delayed index entry");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(moved)
    }

    async fn acquire_lock(
        &self,
        conn: &mut deadpool_redis::Connection,
        key: &str,
        token: &str,
    ) -> LexResult<()> {
        for _ in 0..LOCK_ATTEMPTS {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query_async(&mut **conn)
                .await?;
            if acquired.is_some() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(LOCK_RETRY_DELAY_MS)).await;
        }
        Err(LexError::store_unavailable(format!(
            "Could not acquire record lock {}",
            key
        )))
    }

    async fn release_lock(
        &self,
        conn: &mut deadpool_redis::Connection,
        key: &str,
        token: &str,
    ) {
        if let Ok(Some(current)) = conn.get::<_, Option<String>>(key).await {
            if current == token {
                let released: Result<(), redis::RedisError> = conn.del(key).await;
                if let Err(err) = released {
                    warn!(key = %key, error = %err, "Failed to release record lock");
                }
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: JobRecord) -> LexResult<JobRecord> {
        let mut conn = self.conn().await?;
        let job_key = self.keys.job(job.queue.as_str(), job.id.as_str());

        let exists: bool = conn.exists(&job_key).await?;
        if exists {
            return Err(LexError::invalid_state(format!(
                "Job {} already exists",
                job.id
            )));
        }

        let json = serde_json::to_string(&job)?;
        let _: () = redis::pipe()
            .set(&job_key, json)
            .zadd(
                self.keys.waiting(job.queue.as_str()),
                job.id.as_str(),
                self.waiting_score(&job),
            )
            .query_async(&mut *conn)
            .await?;

        debug!(job_id = %job.id, queue = %job.queue, "Stored new job");
        Ok(job)
    }

    async fn get(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, queue, id).await
    }

    async fn update(
        &self,
        queue: QueueName,
        id: &JobId,
        mutation: Mutation<'_>,
    ) -> LexResult<JobRecord> {
        let mut conn = self.conn().await?;
        let lock_key = self.keys.lock(queue.as_str(), id.as_str());
        let token = Uuid::new_v4().to_string();
        self.acquire_lock(&mut conn, &lock_key, &token).await?;

        let result = async {
            let mut updated = self.load(&mut conn, queue, id).await?;
            mutation(&mut updated)?;
            self.save(&mut conn, &updated).await?;
            self.reindex(&mut conn, &updated).await?;
            Ok(updated)
        }
        .await;

        self.release_lock(&mut conn, &lock_key, &token).await;
        result
    }

    async fn list(&self, queue: QueueName, status: Option<JobStatus>) -> LexResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;
        let q = queue.as_str();

        let mut ids: Vec<String> = Vec::new();
        let statuses: &[JobStatus] = match status {
            Some(ref s) => std::slice::from_ref(s),
            None => &[
                JobStatus::Waiting,
                JobStatus::Active,
                JobStatus::Completed,
                JobStatus::Failed,
            ],
        };

        for status in statuses {
            match status {
                JobStatus::Waiting => {
                    let waiting: Vec<String> = conn.zrange(self.keys.waiting(q), 0, -1).await?;
                    let delayed: Vec<String> = conn.zrange(self.keys.delayed(q), 0, -1).await?;
                    ids.extend(waiting);
                    ids.extend(delayed);
                }
                JobStatus::Active => {
                    let active: Vec<String> = conn.hkeys(self.keys.active(q)).await?;
                    ids.extend(active);
                }
                JobStatus::Completed => {
                    let completed: Vec<String> = conn.zrange(self.keys.completed(q), 0, -1).await?;
                    ids.extend(completed);
                }
                JobStatus::Failed => {
                    let failed: Vec<String> = conn.zrange(self.keys.failed(q), 0, -1).await?;
                    ids.extend(failed);
                }
            }
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&mut conn, queue, &JobId::from(id.as_str())).await {
                Ok(record) => records.push(record),
                Err(LexError::NotFound { .. }) => {
                    warn!(job_id = %id, queue = %queue, "Skipped dangling index entry");
                }
                Err(err) => return Err(err),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn remove(&self, queue: QueueName, id: &JobId) -> LexResult<JobRecord> {
        let mut conn = self.conn().await?;
        let lock_key = self.keys.lock(queue.as_str(), id.as_str());
        let token = Uuid::new_v4().to_string();
        self.acquire_lock(&mut conn, &lock_key, &token).await?;

        let result = async {
            let record = self.load(&mut conn, queue, id).await?;
            let q = queue.as_str();
            let _: () = redis::pipe()
                .del(self.keys.job(q, id.as_str()))
                .zrem(self.keys.waiting(q), id.as_str())
                .zrem(self.keys.delayed(q), id.as_str())
                .hdel(self.keys.active(q), id.as_str())
                .zrem(self.keys.completed(q), id.as_str())
                .zrem(self.keys.failed(q), id.as_str())
                .query_async(&mut *conn)
                .await?;
            debug!(job_id = %id, queue = %queue, "Removed job");
            Ok(record)
        }
        .await;

        self.release_lock(&mut conn, &lock_key, &token).await;
        result
    }

    async fn peek_next(&self, queue: QueueName) -> LexResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let q = queue.as_str();
        let now = Utc::now().timestamp_millis();

        // Consider the head of the waiting zset and the earliest delayed
        // job already past its visibility gate, without promoting either.
        let head: Vec<String> = conn.zrange(self.keys.waiting(q), 0, 0).await?;
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.keys.delayed(q), 0i64, now, 0, 1)
            .await?;

        let mut best: Option<(i64, JobRecord)> = None;
        for id in head.into_iter().chain(due) {
            match self.load(&mut conn, queue, &JobId::from(id.as_str())).await {
                Ok(record) => {
                    let score = record.ordering_score(self.priority_boost_ms);
                    if best.as_ref().map_or(true, |(s, _)| score < *s) {
                        best = Some((score, record));
                    }
                }
                Err(LexError::NotFound { .. }) => {
                    warn!(job_id = %id, queue = %queue, "Skipped dangling index entry");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(best.map(|(_, record)| record))
    }

    async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease: Duration,
    ) -> LexResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        self.promote_due(&mut conn, queue).await?;

        loop {
            // ZPOPMIN hands each waiting ID to exactly one claimer.
            let popped: Vec<(String, f64)> = conn
                .zpopmin(self.keys.waiting(queue.as_str()), 1)
                .await?;
            let Some((id, _score)) = popped.into_iter().next() else {
                return Ok(None);
            };

            let job_id = JobId::from(id.as_str());
            let mut record = match self.load(&mut conn, queue, &job_id).await {
                Ok(record) => record,
                Err(LexError::NotFound { .. }) => {
                    warn!(job_id = %id, queue = %queue, "Dropped dangling waiting index entry");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Err(err) = record.begin(worker_id, lease, Utc::now()) {
                warn!(job_id = %id, queue = %queue, error = %err, "Skipped unclaimable job");
                self.reindex(&mut conn, &record).await?;
                continue;
            }

            self.save(&mut conn, &record).await?;
            let _: () = conn
                .hset(self.keys.active(queue.as_str()), record.id.as_str(), worker_id)
                .await?;

            debug!(
                job_id = %record.id,
                queue = %queue,
                worker_id = %worker_id,
                "Claimed job"
            );
            return Ok(Some(record));
        }
    }

    async fn counts(&self, queue: QueueName) -> LexResult<QueueCounts> {
        let mut conn = self.conn().await?;
        let q = queue.as_str();

        let waiting: u64 = conn.zcard(self.keys.waiting(q)).await?;
        let delayed: u64 = conn.zcard(self.keys.delayed(q)).await?;
        let active: u64 = conn.hlen(self.keys.active(q)).await?;
        let completed: u64 = conn.zcard(self.keys.completed(q)).await?;
        let failed: u64 = conn.zcard(self.keys.failed(q)).await?;

        Ok(QueueCounts {
            waiting: waiting + delayed,
            active,
            completed,
            failed,
        })
    }

    async fn reclaim_expired(&self) -> LexResult<Vec<JobRecord>> {
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for queue in QueueName::ALL {
            let mut conn = self.conn().await?;
            let active: std::collections::HashMap<String, String> =
                conn.hgetall(self.keys.active(queue.as_str())).await?;

            for (id, _worker) in active {
                let job_id = JobId::from(id.as_str());
                let record = match self.load(&mut conn, queue, &job_id).await {
                    Ok(record) => record,
                    Err(LexError::NotFound { .. }) => {
                        let _: () = conn.hdel(self.keys.active(queue.as_str()), &id).await?;
                        warn!(job_id = %id, queue = %queue, "Dropped dangling active index entry");
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let expired = record.lease_expires_at.map_or(false, |e| e <= now);
                if !expired {
                    continue;
                }

                match self
                    .update(queue, &job_id, &move |job| job.expire_lease(now))
                    .await
                {
                    Ok(updated) => reclaimed.push(updated),
                    // The worker finished or renewed between the scan and
                    // the locked update. Nothing to reclaim.
                    Err(err) if err.is_caller_error() => {
                        debug!(job_id = %id, queue = %queue, error = %err, "Lease no longer expired");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(reclaimed)
    }

    async fn ping(&self) -> LexResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}
