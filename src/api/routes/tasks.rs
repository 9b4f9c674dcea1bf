//! Task handlers: progress views and control actions.

use super::ListTasksQuery;
use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{TaskAction, TaskId, TaskState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /tasks - List tasks
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    params(ListTasksQuery),
    responses(
        (status = 200, description = "Tasks in creation order", body = Vec<crate::types::Task>),
        (status = 400, description = "Unknown state filter", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Response {
    let task_state = match query.state.as_deref().map(str::parse::<TaskState>) {
        None => None,
        Some(Ok(task_state)) => Some(task_state),
        Some(Err(message)) => {
            return (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response();
        }
    };

    match state
        .engine
        .list_tasks(query.process_id.as_deref(), task_state)
        .await
    {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list tasks");
            e.into_response()
        }
    }
}

/// GET /tasks/:id - Get a task with its items
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(("id" = i64, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task with items", body = crate::types::TaskDetail),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_task(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.engine.get_task(TaskId(id)).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /tasks/:id/actions/:action - Pause, resume, retry or cancel a task
#[utoipa::path(
    post,
    path = "/tasks/{id}/actions/{action}",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task ID"),
        ("action" = String, Path, description = "pause, resume, retry or cancel")
    ),
    responses(
        (status = 204, description = "Action accepted"),
        (status = 400, description = "Unknown action", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 409, description = "Action not valid in the task's current state", body = crate::error::ApiError),
        (status = 422, description = "Retry not safe for this job kind", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn task_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(i64, String)>,
) -> Response {
    let action = match action.parse::<TaskAction>() {
        Ok(action) => action,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response();
        }
    };

    match state.engine.action(TaskId(id), action).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::debug!(task_id = id, action = %action, error = %e, "Task action rejected");
            e.into_response()
        }
    }
}
