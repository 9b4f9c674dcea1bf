//! Read views over the task store for progress display.

use super::TaskEngine;
use crate::error::{Error, Result, TaskError};
use crate::types::{Task, TaskCounts, TaskDetail, TaskId, TaskState};

impl TaskEngine {
    /// A task with its items
    pub async fn get_task(&self, id: TaskId) -> Result<TaskDetail> {
        self.db
            .get_task_detail(id)
            .await?
            .ok_or(Error::Task(TaskError::NotFound { id: id.0 }))
    }

    /// Tasks in creation order, optionally filtered by process and state
    pub async fn list_tasks(
        &self,
        process_id: Option<&str>,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>> {
        self.db.list_tasks(process_id, state).await
    }

    /// Every task of one submission process
    pub async fn list_tasks_for_process(&self, process_id: &str) -> Result<Vec<Task>> {
        self.db.list_tasks_for_process(process_id).await
    }

    /// Number of tasks per state
    pub async fn task_counts(&self) -> Result<TaskCounts> {
        self.db.task_counts().await
    }
}
