//! Main application router.

use crate::{
    controllers::{health_controller, queue_controller},
    openapi::ApiDoc,
    state::AppState,
};
use axum::{http::HeaderValue, response::IntoResponse, routing::get, Json, Router};
use lexflow_config::ServerConfig;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;

/// Creates the main application router.
pub fn create_router(state: AppState, server_config: &ServerConfig) -> Router {
    let cors = create_cors_layer(server_config);

    let router = Router::new()
        // Health endpoints
        .merge(health_controller::router())
        // Queue monitoring and job control
        .merge(queue_controller::router())
        .with_state(state)
        // OpenAPI spec
        .route("/api-docs/openapi.json", get(openapi_spec))
        // Root endpoint
        .route("/", get(root))
        // Add middleware layers
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("Router created with queue and health endpoints");
    router
}

/// Creates a CORS layer based on server configuration.
fn create_cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if !server_config.cors_enabled {
        return CorsLayer::new();
    }

    if server_config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = server_config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serves the OpenAPI document.
async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "LexFlow Jobs API v1"
}
