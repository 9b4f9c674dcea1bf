//! Item state updates: dispatch, completion with progress, retry requeue.

use crate::types::{ItemState, Progress, TaskId, TaskItem, TaskState};
use crate::Result;

use super::tasks::RECOMPUTE_PROGRESS;
use super::{Database, TaskItemRecord, query_failed};

const ITEM_COLUMNS: &str = "id, task_id, position, label, state, error, data, updated_at";

impl Database {
    /// All items of a task in insertion order
    pub async fn get_task_items(&self, task_id: TaskId) -> Result<Vec<TaskItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM task_items WHERE task_id = ? ORDER BY position");
        let rows = sqlx::query_as::<_, TaskItemRecord>(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("Failed to get task items"))?;

        rows.into_iter().map(TaskItem::try_from).collect()
    }

    /// Items of a task still waiting to be attempted, in insertion order
    pub async fn pending_items(&self, task_id: TaskId) -> Result<Vec<TaskItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM task_items WHERE task_id = ? AND state = ? ORDER BY position"
        );
        let rows = sqlx::query_as::<_, TaskItemRecord>(&sql)
            .bind(task_id)
            .bind(ItemState::Pending.to_i32())
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("Failed to get pending items"))?;

        rows.into_iter().map(TaskItem::try_from).collect()
    }

    /// Move an item from `pending` to `running`
    ///
    /// Returns false when the item is gone (task cancelled) or was not pending.
    pub async fn mark_item_running(&self, item_id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE task_items SET state = ?, updated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(ItemState::Running.to_i32())
        .bind(now)
        .bind(item_id)
        .bind(ItemState::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to mark item running"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist an item's terminal state and bump its task's progress
    ///
    /// Both writes happen in one transaction, and only if the item is still
    /// `running`. Returns the task's new progress, or `None` when the item
    /// no longer exists.
    pub async fn finish_item(
        &self,
        task_id: TaskId,
        item_id: i64,
        state: ItemState,
        error: Option<&str>,
    ) -> Result<Option<Progress>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        let updated = sqlx::query(
            r#"
            UPDATE task_items SET state = ?, error = ?, updated_at = ?
            WHERE id = ? AND task_id = ? AND state = ?
            "#,
        )
        .bind(state.to_i32())
        .bind(error)
        .bind(now)
        .bind(item_id)
        .bind(task_id)
        .bind(ItemState::Running.to_i32())
        .execute(&mut *tx)
        .await
        .map_err(query_failed("Failed to finish item"))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let progress: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE tasks SET progress_done = progress_done + 1, updated_at = ?
            WHERE id = ?
            RETURNING progress_done, progress_total
            "#,
        )
        .bind(now)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_failed("Failed to increment progress"))?;

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit item completion"))?;

        Ok(progress.map(|(done, total)| Progress {
            done: done.max(0) as u64,
            total: total.max(0) as u64,
        }))
    }

    /// Move a `failed` task back to `pending` and reset its failed items
    ///
    /// Failed (and stray running) items return to `pending` with their errors
    /// cleared, and progress is recounted. The task transition and the item
    /// reset commit together. Returns the number of reset items, or `None`
    /// when the task was no longer `failed`.
    pub async fn requeue_failed_task(&self, task_id: TaskId) -> Result<Option<u64>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        let requeued = sqlx::query(
            "UPDATE tasks SET state = ?, error = NULL, updated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(TaskState::Pending.to_i32())
        .bind(now)
        .bind(task_id)
        .bind(TaskState::Failed.to_i32())
        .execute(&mut *tx)
        .await
        .map_err(query_failed("Failed to requeue task"))?;

        if requeued.rows_affected() == 0 {
            return Ok(None);
        }

        let result = sqlx::query(
            r#"
            UPDATE task_items SET state = ?, error = NULL, updated_at = ?
            WHERE task_id = ? AND state IN (?, ?)
            "#,
        )
        .bind(ItemState::Pending.to_i32())
        .bind(now)
        .bind(task_id)
        .bind(ItemState::Failed.to_i32())
        .bind(ItemState::Running.to_i32())
        .execute(&mut *tx)
        .await
        .map_err(query_failed("Failed to reset failed items"))?;

        sqlx::query(RECOMPUTE_PROGRESS)
            .bind(ItemState::Done.to_i32())
            .bind(ItemState::Failed.to_i32())
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("Failed to recompute progress"))?;

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit task requeue"))?;

        Ok(Some(result.rows_affected()))
    }
}
