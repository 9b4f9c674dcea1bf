//! Application state for the API server

use crate::{Config, TaskEngine};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The engine serving task queries and actions
    pub engine: Arc<TaskEngine>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: Arc<TaskEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
