//! Queue monitoring and job control REST API controller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use lexflow_jobs::{
    EngineHealth, JobId, JobOptions, JobRecord, ProcessingStatus, QueueName, QueueStats,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::responses::ApiResult;
use crate::state::AppState;

/// Creates the queue router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/queue/health", get(queue_health))
        .route("/queue/job/:queue/:id", get(get_job).delete(remove_job))
        .route("/queue/job/:queue/:id/retry", post(retry_job))
        .route("/queue/:queue/enqueue", post(enqueue_job))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Full job view returned by the job endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Job identifier.
    pub id: String,
    /// Owning queue.
    pub queue: String,
    /// Engine-level status.
    pub status: String,
    /// Client-facing processing status projection.
    pub processing_status: String,
    /// Progress percent, 0-100.
    pub progress: u8,
    /// Execution attempts so far.
    pub attempts: u32,
    /// Attempt bound for automatic retries.
    pub max_attempts: u32,
    /// Claim ordering priority.
    pub priority: i8,
    /// Success value, present only when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason, present only when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,
    /// Last claim time, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<i64>,
    /// Terminal state time, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<i64>,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id.to_string(),
            queue: record.queue.as_str().to_string(),
            status: record.status.as_str().to_string(),
            processing_status: match ProcessingStatus::from(record.status) {
                ProcessingStatus::Pending => "PENDING".to_string(),
                ProcessingStatus::Processing => "PROCESSING".to_string(),
                ProcessingStatus::Processed => "PROCESSED".to_string(),
                ProcessingStatus::Failed => "FAILED".to_string(),
            },
            progress: record.progress,
            attempts: record.attempts,
            max_attempts: record.max_attempts,
            priority: record.priority,
            result: record.result,
            failed_reason: record.failure_reason,
            timestamp: record.created_at.timestamp_millis(),
            processed_on: record.leased_at.map(|t| t.timestamp_millis()),
            finished_on: record.finished_at.map(|t| t.timestamp_millis()),
        }
    }
}

/// Request body for job creation.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    /// Typed payload for the target queue.
    pub payload: Value,
    /// Claim ordering priority, higher first.
    #[serde(default)]
    pub priority: i8,
    /// Overrides the queue's default attempt bound.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Response for job creation.
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    /// Identifier of the created job.
    pub id: String,
}

/// Simple message response.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handler Functions
// ============================================================================

/// Get per-queue job counts.
#[utoipa::path(
    get,
    path = "/queue/stats",
    tag = "queue",
    responses(
        (status = 200, description = "Per-queue job counts with a snapshot timestamp")
    )
)]
pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    let stats = state.engine.stats().await?;
    Ok(Json(stats))
}

/// Get engine health.
#[utoipa::path(
    get,
    path = "/queue/health",
    tag = "queue",
    responses(
        (status = 200, description = "Engine health status")
    )
)]
pub async fn queue_health(State(state): State<AppState>) -> Json<EngineHealth> {
    Json(state.engine.health().await)
}

/// Get a job by queue and ID.
#[utoipa::path(
    get,
    path = "/queue/job/{queue}/{id}",
    tag = "queue",
    params(
        ("queue" = String, Path, description = "Queue name"),
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job found", body = JobResponse),
        (status = 404, description = "Unknown queue or job", body = lexflow_core::ErrorResponse)
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> ApiResult<Json<JobResponse>> {
    let queue: QueueName = queue.parse()?;
    let job = state.engine.job(queue, &JobId::from(id)).await?;
    Ok(Json(job.into()))
}

/// Retry a terminally failed job.
#[utoipa::path(
    post,
    path = "/queue/job/{queue}/{id}/retry",
    tag = "queue",
    params(
        ("queue" = String, Path, description = "Queue name"),
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job requeued", body = JobResponse),
        (status = 404, description = "Unknown queue or job", body = lexflow_core::ErrorResponse),
        (status = 409, description = "Job is not in the failed state", body = lexflow_core::ErrorResponse)
    )
)]
pub async fn retry_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> ApiResult<Json<JobResponse>> {
    let queue: QueueName = queue.parse()?;
    let job = state.engine.retry_job(queue, &JobId::from(id)).await?;
    Ok(Json(job.into()))
}

/// Remove a job.
#[utoipa::path(
    delete,
    path = "/queue/job/{queue}/{id}",
    tag = "queue",
    params(
        ("queue" = String, Path, description = "Queue name"),
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job removed", body = MessageResponse),
        (status = 404, description = "Unknown queue or job", body = lexflow_core::ErrorResponse)
    )
)]
pub async fn remove_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    let queue: QueueName = queue.parse()?;
    let id = JobId::from(id);
    state.engine.remove_job(queue, &id).await?;
    Ok(Json(MessageResponse {
        message: format!("Job {} removed", id),
    }))
}

/// Enqueue a job.
#[utoipa::path(
    post,
    path = "/queue/{queue}/enqueue",
    tag = "queue",
    params(
        ("queue" = String, Path, description = "Queue name")
    ),
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Job created", body = EnqueueResponse),
        (status = 400, description = "Payload does not match the queue", body = lexflow_core::ErrorResponse),
        (status = 404, description = "Unknown queue", body = lexflow_core::ErrorResponse)
    )
)]
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<impl IntoResponse> {
    let queue: QueueName = queue.parse()?;
    let options = JobOptions {
        priority: request.priority,
        max_attempts: request.max_attempts,
    };
    let job = state.engine.enqueue(queue, request.payload, options).await?;
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            id: job.id.to_string(),
        }),
    ))
}
