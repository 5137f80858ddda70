//! Error-to-response mapping for REST handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lexflow_core::{ErrorResponse, LexError};
use tracing::error;

/// Result alias for REST handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Wraps a [`LexError`] so handlers can propagate it with `?` and let
/// Axum render the HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LexError);

impl From<LexError> for ApiError {
    fn from(err: LexError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.0.error_code(), "Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}
