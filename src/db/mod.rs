//! Database layer for records-tasks
//!
//! Handles SQLite persistence for tasks, their items, and runtime state.
//! The store is the single source of truth for every observer of a task.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task CRUD, conditional state transitions, progress, recovery
//! - [`items`] - Item state updates and retry reset
//! - [`state`] - Runtime state (shutdown tracking)

use crate::Result;
use crate::error::DatabaseError;
use crate::types::{ItemState, Payload, Progress, Task, TaskId, TaskItem, TaskState};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod items;
mod migrations;
mod state;
mod tasks;

/// Task row as stored in the `tasks` table
#[derive(Debug, Clone, FromRow)]
pub struct TaskRecord {
    /// Unique database ID
    pub id: i64,
    /// Submission process the task belongs to
    pub process_id: String,
    /// Job kind
    pub kind: String,
    /// State code (see [`TaskState::to_i32`])
    pub state: i32,
    /// Items in a terminal state
    pub progress_done: i64,
    /// Total number of items
    pub progress_total: i64,
    /// Failure summary
    pub error: Option<String>,
    /// Triggering user
    pub user_id: Option<String>,
    /// JSON-encoded payload
    pub data: String,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl TryFrom<TaskRecord> for Task {
    type Error = crate::Error;

    fn try_from(row: TaskRecord) -> Result<Self> {
        Ok(Task {
            id: TaskId(row.id),
            process_id: row.process_id,
            kind: row.kind,
            state: TaskState::from_i32(row.state),
            progress: Progress {
                done: row.progress_done.max(0) as u64,
                total: row.progress_total.max(0) as u64,
            },
            error: row.error,
            user_id: row.user_id,
            data: decode_payload(&row.data)?,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        })
    }
}

/// Item row as stored in the `task_items` table
#[derive(Debug, Clone, FromRow)]
pub struct TaskItemRecord {
    /// Unique database ID
    pub id: i64,
    /// Owning task
    pub task_id: i64,
    /// Zero-based insertion order
    pub position: i64,
    /// Label used in failure summaries
    pub label: String,
    /// State code (see [`ItemState::to_i32`])
    pub state: i32,
    /// Failure message
    pub error: Option<String>,
    /// JSON-encoded payload
    pub data: String,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl TryFrom<TaskItemRecord> for TaskItem {
    type Error = crate::Error;

    fn try_from(row: TaskItemRecord) -> Result<Self> {
        Ok(TaskItem {
            id: row.id,
            task_id: TaskId(row.task_id),
            position: row.position,
            label: row.label,
            state: ItemState::from_i32(row.state),
            error: row.error,
            data: decode_payload(&row.data)?,
            updated_at: timestamp(row.updated_at),
        })
    }
}

/// Map a sqlx error to `DatabaseError::QueryFailed` with context
fn query_failed(context: &'static str) -> impl Fn(sqlx::Error) -> crate::Error {
    move |e| crate::Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

/// Stored payloads are always JSON; anything else means the row was damaged
fn decode_payload(raw: &str) -> Result<Payload> {
    serde_json::from_str(raw).map(Payload).map_err(|e| {
        crate::Error::Database(DatabaseError::CorruptRecord(format!(
            "payload is not valid JSON: {}",
            e
        )))
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Database handle
pub struct Database {
    pool: SqlitePool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
