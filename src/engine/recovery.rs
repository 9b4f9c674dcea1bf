//! Startup recovery and restore of queued tasks.

use super::TaskEngine;
use crate::error::Result;
use crate::types::{Event, TaskState};

/// Error recorded on tasks and items cut off by a process restart
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

impl TaskEngine {
    /// Fail every task the previous process left `running` or `pausing`
    ///
    /// Runs once before any work is accepted. No handler is invoked: the
    /// engine cannot know how far an interrupted item got.
    pub(crate) async fn recover(&self) -> Result<()> {
        if self.db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly");
        }

        let recovered = self.db.recover_interrupted(INTERRUPTED_BY_RESTART).await?;
        if recovered.is_empty() {
            return Ok(());
        }

        tracing::warn!(count = recovered.len(), "Failed tasks interrupted by restart");
        for id in recovered {
            tracing::warn!(task_id = id.0, "Task interrupted by restart");
            self.emit_event(Event::Recovered { id });
            self.emit_event(Event::Failed {
                id,
                error: INTERRUPTED_BY_RESTART.to_string(),
            });
        }

        Ok(())
    }

    /// Queue the tasks left `pending` by the previous session, oldest first
    ///
    /// Tasks of kinds that are no longer registered stay `pending` untouched.
    pub(crate) async fn restore_pending(&self) -> Result<()> {
        let pending = self.db.list_tasks_in_state(TaskState::Pending).await?;
        if pending.is_empty() {
            return Ok(());
        }

        tracing::info!(count = pending.len(), "Restoring queued tasks");
        for task in pending {
            if self.registry.get(&task.kind).is_none() {
                tracing::error!(
                    task_id = task.id.0,
                    kind = %task.kind,
                    "Job kind not registered, task left pending"
                );
                continue;
            }
            self.enqueue(task.id, &task.kind).await?;
        }

        Ok(())
    }
}
