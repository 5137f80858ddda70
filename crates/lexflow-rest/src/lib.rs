//! # LexFlow REST
//!
//! REST API layer using Axum for the LexFlow job engine.
//! Provides HTTP endpoints for queue monitoring, job control, and health
//! checks, plus an OpenAPI document.

pub mod controllers;
pub mod openapi;
pub mod responses;
pub mod router;
pub mod state;

pub use responses::{ApiError, ApiResult};
pub use router::create_router;
pub use state::AppState;
