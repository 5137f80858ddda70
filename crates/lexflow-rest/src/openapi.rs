//! OpenAPI documentation configuration.

use crate::controllers::health_controller::HealthResponse;
use crate::controllers::queue_controller::{
    EnqueueRequest, EnqueueResponse, JobResponse, MessageResponse,
};
use lexflow_core::ErrorResponse;
use utoipa::OpenApi;

/// OpenAPI documentation for the LexFlow Jobs API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "LexFlow Jobs API",
        version = "1.0.0",
        description = "Queue monitoring and job control API for the LexFlow job engine",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        // Queue endpoints
        crate::controllers::queue_controller::queue_stats,
        crate::controllers::queue_controller::queue_health,
        crate::controllers::queue_controller::get_job,
        crate::controllers::queue_controller::retry_job,
        crate::controllers::queue_controller::remove_job,
        crate::controllers::queue_controller::enqueue_job,
        // Health endpoints
        crate::controllers::health_controller::health_check,
        crate::controllers::health_controller::readiness_check,
        crate::controllers::health_controller::liveness_check,
    ),
    components(
        schemas(
            ErrorResponse,
            JobResponse,
            EnqueueRequest,
            EnqueueResponse,
            MessageResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "queue", description = "Queue monitoring and job control endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;
