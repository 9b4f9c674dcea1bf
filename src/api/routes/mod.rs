//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] - Task progress views and control actions
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod system;
mod tasks;

pub use system::*;
pub use tasks::*;

/// Query parameters for GET /tasks
#[derive(Debug, Default, Deserialize, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTasksQuery {
    /// Only tasks of this submission process
    pub process_id: Option<String>,
    /// Only tasks in this state: pending, running, paused, pausing, failed or done
    pub state: Option<String>,
}
