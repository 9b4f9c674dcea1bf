//! Task CRUD, conditional state transitions and restart recovery.

use crate::types::{ItemState, NewTask, Task, TaskCounts, TaskDetail, TaskId, TaskState};
use crate::Result;

use super::{Database, TaskRecord, query_failed};

const TASK_COLUMNS: &str = "id, process_id, kind, state, progress_done, progress_total, \
     error, user_id, data, created_at, updated_at";

/// Recount terminal items of one task (bind: done code, failed code, task id)
pub(super) const RECOMPUTE_PROGRESS: &str = r#"
    UPDATE tasks SET progress_done = (
        SELECT COUNT(*) FROM task_items WHERE task_id = tasks.id AND state IN (?, ?)
    )
    WHERE id = ?
"#;

impl Database {
    /// Insert a task and all of its items in one transaction
    ///
    /// The task starts `pending` with every item `pending` and
    /// `progress = {0, items.len()}`.
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = chrono::Utc::now().timestamp();
        let data = serde_json::to_string(&task.data)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                process_id, kind, state, progress_done, progress_total,
                user_id, data, created_at, updated_at
            ) VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.process_id)
        .bind(&task.kind)
        .bind(TaskState::Pending.to_i32())
        .bind(task.items.len() as i64)
        .bind(&task.user_id)
        .bind(data)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("Failed to insert task"))?;

        let task_id = result.last_insert_rowid();

        for (position, item) in task.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO task_items (task_id, position, label, state, data, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id)
            .bind(position as i64)
            .bind(&item.label)
            .bind(ItemState::Pending.to_i32())
            .bind(serde_json::to_string(&item.data)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("Failed to insert task item"))?;
        }

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit task insert"))?;

        Ok(TaskId(task_id))
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("Failed to get task"))?;

        row.map(Task::try_from).transpose()
    }

    /// Get a task together with its items
    pub async fn get_task_detail(&self, id: TaskId) -> Result<Option<TaskDetail>> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };
        let items = self.get_task_items(id).await?;

        Ok(Some(TaskDetail { task, items }))
    }

    /// List tasks in creation order, optionally filtered by process and state
    pub async fn list_tasks(
        &self,
        process_id: Option<&str>,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE (?1 IS NULL OR process_id = ?1) AND (?2 IS NULL OR state = ?2) \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(process_id)
            .bind(state.map(|s| s.to_i32()))
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("Failed to list tasks"))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// All tasks of one submission process
    pub async fn list_tasks_for_process(&self, process_id: &str) -> Result<Vec<Task>> {
        self.list_tasks(Some(process_id), None).await
    }

    /// All tasks in one state, oldest first
    pub async fn list_tasks_in_state(&self, state: TaskState) -> Result<Vec<Task>> {
        self.list_tasks(None, Some(state)).await
    }

    /// Number of tasks per state
    pub async fn task_counts(&self) -> Result<TaskCounts> {
        let rows: Vec<(i32, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM tasks GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(query_failed("Failed to count tasks"))?;

        let mut counts = TaskCounts::default();
        for (state, count) in rows {
            let count = count.max(0) as u64;
            match TaskState::from_i32(state) {
                TaskState::Pending => counts.pending += count,
                TaskState::Running => counts.running += count,
                TaskState::Paused => counts.paused += count,
                TaskState::Pausing => counts.pausing += count,
                TaskState::Failed => counts.failed += count,
                TaskState::Done => counts.done += count,
            }
        }

        Ok(counts)
    }

    /// Move a task from `from` to `to` only if it is still in `from`
    ///
    /// Returns false when the task is gone or another party changed its state
    /// first. Leaving `failed` clears the error.
    pub async fn transition_task_state(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, error = CASE WHEN ? THEN error ELSE NULL END, updated_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(to.to_i32())
        .bind(to == TaskState::Failed)
        .bind(now)
        .bind(id)
        .bind(from.to_i32())
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to update task state"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Record the terminal state of a run
    ///
    /// Applies only while the task is `running` or `pausing`, so a concurrent
    /// cancel (row removed) is never resurrected.
    pub async fn set_task_outcome(
        &self,
        id: TaskId,
        state: TaskState,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = ?, error = ?, updated_at = ?
            WHERE id = ? AND state IN (?, ?)
            "#,
        )
        .bind(state.to_i32())
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(TaskState::Running.to_i32())
        .bind(TaskState::Pausing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to record task outcome"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a task that has not reached a terminal state
    ///
    /// Items go with it by cascade. Returns false when the task is gone or
    /// already `done`/`failed`.
    pub async fn delete_task(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND state NOT IN (?, ?)")
            .bind(id)
            .bind(TaskState::Done.to_i32())
            .bind(TaskState::Failed.to_i32())
            .execute(&self.pool)
            .await
            .map_err(query_failed("Failed to delete task"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every task a previous process left `running` or `pausing`
    ///
    /// Their `running` items become `failed` with the same message and progress
    /// is recounted. Returns the affected task IDs, oldest first.
    pub async fn recover_interrupted(&self, message: &str) -> Result<Vec<TaskId>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM tasks WHERE state IN (?, ?) ORDER BY created_at ASC, id ASC",
        )
        .bind(TaskState::Running.to_i32())
        .bind(TaskState::Pausing.to_i32())
        .fetch_all(&mut *tx)
        .await
        .map_err(query_failed("Failed to find interrupted tasks"))?;

        for &id in &ids {
            sqlx::query(
                r#"
                UPDATE task_items SET state = ?, error = ?, updated_at = ?
                WHERE task_id = ? AND state = ?
                "#,
            )
            .bind(ItemState::Failed.to_i32())
            .bind(message)
            .bind(now)
            .bind(id)
            .bind(ItemState::Running.to_i32())
            .execute(&mut *tx)
            .await
            .map_err(query_failed("Failed to fail interrupted items"))?;

            sqlx::query(RECOMPUTE_PROGRESS)
                .bind(ItemState::Done.to_i32())
                .bind(ItemState::Failed.to_i32())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("Failed to recompute progress"))?;

            sqlx::query("UPDATE tasks SET state = ?, error = ?, updated_at = ? WHERE id = ?")
                .bind(TaskState::Failed.to_i32())
                .bind(message)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("Failed to fail interrupted task"))?;
        }

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit recovery"))?;

        Ok(ids.into_iter().map(TaskId).collect())
    }
}
