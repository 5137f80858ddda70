//! Application state for Axum handlers.

use lexflow_jobs::JobControl;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn JobControl>,
}

impl AppState {
    /// Creates a new application state.
    #[must_use]
    pub fn new(engine: Arc<dyn JobControl>) -> Self {
        Self { engine }
    }
}
