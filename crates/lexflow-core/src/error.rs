//! Unified error types for all layers of the job engine.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for the LexFlow job engine.
///
/// Covers the engine's state-machine violations, lease accounting, handler
/// failures, and infrastructure errors, each mapped to a stable machine
/// readable code and an HTTP status.
#[derive(Error, Debug)]
pub enum LexError {
    // ============ State Machine Errors ============
    /// Attempted status change violates the job state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Operation not valid for the job's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Worker reported on a job after losing its lease
    #[error("Lease expired for job {job_id}")]
    LeaseExpired { job_id: String },

    // ============ Execution Errors ============
    /// Caller-supplied handler returned an error
    #[error("Handler error: {0}")]
    Handler(String),

    /// Handler exceeded its maximum execution time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Infrastructure Errors ============
    /// Job record store unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LexError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::InvalidTransition { .. } | Self::InvalidState(_) | Self::LeaseExpired { .. } => {
                409
            }
            Self::Timeout(_) | Self::StoreUnavailable(_) => 503,
            Self::Handler(_) | Self::Configuration(_) | Self::Serialization(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::LeaseExpired { .. } => "LEASE_EXPIRED",
            Self::Handler(_) => "HANDLER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates an invalid transition error.
    #[must_use]
    pub fn invalid_transition<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state<T: Into<String>>(message: T) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a lease expired error.
    #[must_use]
    pub fn lease_expired<T: ToString>(job_id: T) -> Self {
        Self::LeaseExpired {
            job_id: job_id.to_string(),
        }
    }

    /// Creates a handler error.
    #[must_use]
    pub fn handler<T: Into<String>>(message: T) -> Self {
        Self::Handler(message.into())
    }

    /// Creates a store unavailable error.
    #[must_use]
    pub fn store_unavailable<T: Into<String>>(message: T) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::StoreUnavailable(_))
    }

    /// Checks if this error is a caller bug that must never be retried.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::InvalidState(_)
                | Self::NotFound { .. }
                | Self::Validation(_)
        )
    }
}

impl From<serde_json::Error> for LexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for LexError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(format!("Redis error: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for LexError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::StoreUnavailable(format!("Redis pool error: {}", err))
    }
}

/// Serializable error response for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `LexError`.
    #[must_use]
    pub fn from_error(error: &LexError) -> Self {
        Self {
            error: error.to_string(),
            code: error.error_code().to_string(),
        }
    }
}

impl From<&LexError> for ErrorResponse {
    fn from(error: &LexError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(LexError::not_found("Job", "abc").status_code(), 404);
        assert_eq!(LexError::validation("bad payload").status_code(), 400);
        assert_eq!(
            LexError::invalid_transition("waiting", "completed").status_code(),
            409
        );
        assert_eq!(LexError::invalid_state("not failed").status_code(), 409);
        assert_eq!(LexError::lease_expired("job-1").status_code(), 409);
        assert_eq!(
            LexError::Timeout("handler exceeded 30s".to_string()).status_code(),
            503
        );
        assert_eq!(LexError::store_unavailable("down").status_code(), 503);
        assert_eq!(LexError::handler("boom").status_code(), 500);
        assert_eq!(LexError::internal("oops").status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LexError::not_found("Job", 1).error_code(), "NOT_FOUND");
        assert_eq!(
            LexError::invalid_transition("active", "waiting").error_code(),
            "INVALID_TRANSITION"
        );
        assert_eq!(LexError::invalid_state("x").error_code(), "INVALID_STATE");
        assert_eq!(LexError::lease_expired("j").error_code(), "LEASE_EXPIRED");
        assert_eq!(LexError::handler("h").error_code(), "HANDLER_ERROR");
        assert_eq!(
            LexError::Timeout("t".to_string()).error_code(),
            "TIMEOUT"
        );
        assert_eq!(
            LexError::store_unavailable("s").error_code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(LexError::validation("v").error_code(), "VALIDATION_ERROR");
        assert_eq!(LexError::internal("i").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LexError::Timeout("t".to_string()).is_retryable());
        assert!(LexError::store_unavailable("down").is_retryable());
        assert!(!LexError::handler("boom").is_retryable());
        assert!(!LexError::not_found("Job", 1).is_retryable());
        assert!(!LexError::invalid_state("x").is_retryable());
    }

    #[test]
    fn test_caller_errors() {
        assert!(LexError::invalid_transition("waiting", "completed").is_caller_error());
        assert!(LexError::invalid_state("not failed").is_caller_error());
        assert!(LexError::not_found("Job", 1).is_caller_error());
        assert!(LexError::validation("bad").is_caller_error());
        assert!(!LexError::Timeout("t".to_string()).is_caller_error());
        assert!(!LexError::handler("h").is_caller_error());
    }

    #[test]
    fn test_error_display() {
        let err = LexError::invalid_transition("waiting", "completed");
        assert_eq!(
            err.to_string(),
            "Invalid status transition: waiting -> completed"
        );

        let err = LexError::lease_expired("job-9");
        assert!(err.to_string().contains("job-9"));

        let err = LexError::not_found("Job", "abc");
        assert!(err.to_string().contains("Job"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: LexError = parse_err.into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_error_response_from_error() {
        let err = LexError::not_found("Job", "abc");
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.code, "NOT_FOUND");
        assert!(!response.error.is_empty());
    }

    #[test]
    fn test_error_response_from_ref() {
        let err = LexError::invalid_state("cannot retry a waiting job");
        let response: ErrorResponse = ErrorResponse::from(&err);
        assert_eq!(response.code, "INVALID_STATE");
        assert!(response.error.contains("cannot retry"));
    }
}
