//! Job model and state machine.

use chrono::{DateTime, Utc};
use lexflow_core::{LexError, LexResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The fixed set of queues the engine serves.
///
/// Each queue has its own worker pool and payload variant. Wire names are
/// kebab-case and appear in URLs and stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    DocumentProcessing,
    UserRequests,
    AiAnalysis,
}

impl QueueName {
    /// All queues, in dispatch order.
    pub const ALL: [Self; 3] = [Self::DocumentProcessing, Self::UserRequests, Self::AiAnalysis];

    /// Returns the kebab-case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document-processing",
            Self::UserRequests => "user-requests",
            Self::AiAnalysis => "ai-analysis",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = LexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document-processing" => Ok(Self::DocumentProcessing),
            "user-requests" => Ok(Self::UserRequests),
            "ai-analysis" => Ok(Self::AiAnalysis),
            other => Err(LexError::not_found("queue", other)),
        }
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting to be claimed.
    Waiting,
    /// Job is leased to a worker.
    Active,
    /// Job completed successfully.
    Completed,
    /// Job failed terminally and awaits manual retry or removal.
    Failed,
}

impl JobStatus {
    /// Returns the snake_case wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client-visible processing status of the document a job backs.
///
/// The document UI polls this projection until it reaches a terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl From<JobStatus> for ProcessingStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Waiting => Self::Pending,
            JobStatus::Active => Self::Processing,
            JobStatus::Completed => Self::Processed,
            JobStatus::Failed => Self::Failed,
        }
    }
}

/// Payload for document ingestion jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProcessingPayload {
    /// Document to ingest.
    pub doc_id: i64,
    /// Original file name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Payload for user-triggered background requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequestPayload {
    /// Requesting user.
    pub user_id: String,
    /// Action to perform.
    pub action: String,
    /// Free-form action parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Payload for AI analysis jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysisPayload {
    /// Document to analyze.
    pub doc_id: i64,
    /// Kind of analysis requested (summary, timeline, entities, ...).
    pub analysis_type: String,
}

/// Typed job payload, one variant per queue.
///
/// Enqueue rejects a payload whose variant does not match the target queue,
/// so each queue's workers only ever see their own variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    DocumentProcessing(DocumentProcessingPayload),
    UserRequest(UserRequestPayload),
    AiAnalysis(AiAnalysisPayload),
}

impl JobPayload {
    /// Returns the queue this payload belongs to.
    #[must_use]
    pub const fn queue(&self) -> QueueName {
        match self {
            Self::DocumentProcessing(_) => QueueName::DocumentProcessing,
            Self::UserRequest(_) => QueueName::UserRequests,
            Self::AiAnalysis(_) => QueueName::AiAnalysis,
        }
    }

    /// Returns true if this payload may be enqueued on the given queue.
    #[must_use]
    pub fn matches_queue(&self, queue: QueueName) -> bool {
        self.queue() == queue
    }

    /// Parses a raw JSON body into the payload variant for the given queue.
    pub fn from_queue_value(queue: QueueName, value: Value) -> LexResult<Self> {
        let payload = match queue {
            QueueName::DocumentProcessing => Self::DocumentProcessing(
                serde_json::from_value(value)
                    .map_err(|e| LexError::validation(format!("Invalid payload: {}", e)))?,
            ),
            QueueName::UserRequests => Self::UserRequest(
                serde_json::from_value(value)
                    .map_err(|e| LexError::validation(format!("Invalid payload: {}", e)))?,
            ),
            QueueName::AiAnalysis => Self::AiAnalysis(
                serde_json::from_value(value)
                    .map_err(|e| LexError::validation(format!("Invalid payload: {}", e)))?,
            ),
        };
        Ok(payload)
    }
}

/// Enqueue-time options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Higher priority jobs are claimed earlier. Default 0.
    #[serde(default)]
    pub priority: i8,
    /// Override for the queue's default attempt bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl JobOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Persisted job record, the unit of schedulable work.
///
/// All status changes go through the transition methods below so the state
/// machine is enforced in one place. A violated transition returns
/// `InvalidTransition` and leaves the record untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier, assigned at enqueue.
    pub id: JobId,
    /// Owning queue.
    pub queue: QueueName,
    /// Typed payload.
    pub payload: JobPayload,
    /// Current status.
    pub status: JobStatus,
    /// Progress percent, 0-100, reported by the handler while active.
    pub progress: u8,
    /// Success value, present only when completed.
    pub result: Option<Value>,
    /// Failure reason, present only when failed.
    pub failure_reason: Option<String>,
    /// Execution attempts so far.
    pub attempts: u32,
    /// Attempt bound for automatic retries.
    pub max_attempts: u32,
    /// Claim ordering priority.
    pub priority: i8,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Backoff gate; a waiting job is claimable only once this passes.
    pub visible_after: Option<DateTime<Utc>>,
    /// Last lease acquisition time.
    pub leased_at: Option<DateTime<Utc>>,
    /// Terminal state time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Worker holding the lease, set iff active.
    pub lease_owner: Option<String>,
    /// Lease expiry, set iff active.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a new waiting job.
    ///
    /// Rejects a payload whose variant does not match the target queue.
    pub fn new(
        queue: QueueName,
        payload: JobPayload,
        options: JobOptions,
        default_max_attempts: u32,
    ) -> LexResult<Self> {
        if !payload.matches_queue(queue) {
            return Err(LexError::validation(format!(
                "Payload for queue '{}' cannot be enqueued on '{}'",
                payload.queue(),
                queue
            )));
        }

        Ok(Self {
            id: JobId::new(),
            queue,
            payload,
            status: JobStatus::Waiting,
            progress: 0,
            result: None,
            failure_reason: None,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(default_max_attempts).max(1),
            priority: options.priority,
            created_at: Utc::now(),
            visible_after: None,
            leased_at: None,
            finished_at: None,
            lease_owner: None,
            lease_expires_at: None,
        })
    }

    /// Returns true if the job can be handed to a worker at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.visible_after.map_or(true, |v| v <= now)
    }

    /// Claim ordering score. Lower scores are claimed first.
    ///
    /// Priority subtracts `boost_ms` per level, so a waiting job gains one
    /// effective priority level per `boost_ms` waited and low-priority work
    /// is never starved indefinitely.
    #[must_use]
    pub fn ordering_score(&self, boost_ms: i64) -> i64 {
        self.created_at.timestamp_millis() - i64::from(self.priority) * boost_ms
    }

    /// Transitions waiting -> active, recording the lease.
    pub fn begin(&mut self, worker_id: &str, lease: Duration, now: DateTime<Utc>) -> LexResult<()> {
        if self.status != JobStatus::Waiting {
            return Err(LexError::invalid_transition(
                self.status.as_str(),
                JobStatus::Active.as_str(),
            ));
        }

        self.status = JobStatus::Active;
        self.leased_at = Some(now);
        self.lease_owner = Some(worker_id.to_string());
        self.lease_expires_at = Some(now + chrono::Duration::milliseconds(lease.as_millis() as i64));
        self.visible_after = None;
        Ok(())
    }

    /// Transitions active -> completed with the handler's result.
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) -> LexResult<()> {
        if self.status != JobStatus::Active {
            return Err(LexError::invalid_transition(
                self.status.as_str(),
                JobStatus::Completed.as_str(),
            ));
        }

        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.finished_at = Some(now);
        self.clear_lease();
        Ok(())
    }

    /// Transitions active -> failed terminally, counting the attempt.
    pub fn fail_terminal(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> LexResult<()> {
        if self.status != JobStatus::Active {
            return Err(LexError::invalid_transition(
                self.status.as_str(),
                JobStatus::Failed.as_str(),
            ));
        }

        self.attempts += 1;
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(now);
        self.clear_lease();
        Ok(())
    }

    /// Transitions active -> waiting for an automatic retry, counting the
    /// attempt and gating visibility behind the backoff delay.
    pub fn retry_with_backoff(&mut self, visible_after: DateTime<Utc>) -> LexResult<()> {
        if self.status != JobStatus::Active {
            return Err(LexError::invalid_transition(
                self.status.as_str(),
                JobStatus::Waiting.as_str(),
            ));
        }

        self.attempts += 1;
        self.status = JobStatus::Waiting;
        self.progress = 0;
        self.visible_after = Some(visible_after);
        self.clear_lease();
        Ok(())
    }

    /// Reverts an active job whose lease has expired back to waiting.
    pub fn expire_lease(&mut self, now: DateTime<Utc>) -> LexResult<()> {
        if self.status != JobStatus::Active {
            return Err(LexError::invalid_transition(
                self.status.as_str(),
                JobStatus::Waiting.as_str(),
            ));
        }
        match self.lease_expires_at {
            Some(expires) if expires <= now => {}
            _ => {
                return Err(LexError::invalid_state(format!(
                    "Lease for job {} has not expired",
                    self.id
                )))
            }
        }

        self.attempts += 1;
        self.status = JobStatus::Waiting;
        self.progress = 0;
        self.visible_after = None;
        self.clear_lease();
        Ok(())
    }

    /// Resets a terminally failed job for a manual retry.
    pub fn reset_for_retry(&mut self) -> LexResult<()> {
        if self.status != JobStatus::Failed {
            return Err(LexError::invalid_state(format!(
                "Only failed jobs can be retried, job {} is {}",
                self.id, self.status
            )));
        }

        self.status = JobStatus::Waiting;
        self.attempts = 0;
        self.progress = 0;
        self.result = None;
        self.failure_reason = None;
        self.finished_at = None;
        self.visible_after = None;
        Ok(())
    }

    /// Records handler progress. Progress never decreases while active.
    pub fn set_progress(&mut self, percent: u8) -> LexResult<()> {
        if self.status != JobStatus::Active {
            return Err(LexError::invalid_state(format!(
                "Progress can only be reported on an active job, job {} is {}",
                self.id, self.status
            )));
        }

        self.progress = self.progress.max(percent.min(100));
        Ok(())
    }

    /// Extends the lease for the worker that holds it.
    pub fn renew_lease(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> LexResult<()> {
        if !self.is_leased_by(worker_id) {
            return Err(LexError::lease_expired(&self.id));
        }
        self.lease_expires_at = Some(now + chrono::Duration::milliseconds(lease.as_millis() as i64));
        Ok(())
    }

    /// Returns true if the holder of `worker_id` still owns the lease.
    #[must_use]
    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Active && self.lease_owner.as_deref() == Some(worker_id)
    }

    fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }
}
