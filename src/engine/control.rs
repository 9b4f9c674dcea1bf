//! Task control: create, start, pause, resume, retry, cancel.

use std::sync::atomic::Ordering;

use super::TaskEngine;
use crate::error::{Error, Result, TaskError};
use crate::types::{Event, NewTask, Task, TaskAction, TaskId, TaskState};

impl TaskEngine {
    /// Persist a new task with its items and queue it for execution
    ///
    /// Returns as soon as the task is stored; it waits `pending` until its
    /// kind has a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if shutdown has already begun; nothing
    /// is stored then. If shutdown begins after the task was stored, its id
    /// is still returned and the task stays `pending` until the next start.
    ///
    /// # Panics
    ///
    /// Panics if `task.kind` is not registered. Nothing is written in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use records_tasks::*;
    /// # async fn example(engine: TaskEngine) -> Result<()> {
    /// let task = NewTask::new("process-42", "format-verification")
    ///     .with_user("clerk")
    ///     .with_item("report.pdf", Payload::from(serde_json::json!("3f1c.pdf")));
    /// let id = engine.run(task).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, task: NewTask) -> Result<TaskId> {
        self.ensure_accepting()?;
        self.submit(task).await
    }

    /// Store `task` and hand it to its kind's dispatcher
    pub(crate) async fn submit(&self, task: NewTask) -> Result<TaskId> {
        let _ = self.registry.registration(&task.kind);

        let id = self.db.insert_task(&task).await?;
        tracing::info!(
            task_id = id.0,
            kind = %task.kind,
            process_id = %task.process_id,
            items = task.items.len(),
            "Task created"
        );
        self.emit_event(Event::Queued {
            id,
            kind: task.kind.clone(),
        });

        match self.enqueue(id, &task.kind).await {
            Ok(()) => Ok(id),
            Err(Error::ShuttingDown) => {
                tracing::info!(
                    task_id = id.0,
                    "Shutdown began before the task was queued; it stays pending"
                );
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue an already-stored `pending` task
    ///
    /// Starting a task that is already queued or running in this process
    /// does nothing.
    pub async fn start(&self, id: TaskId) -> Result<()> {
        self.ensure_accepting()?;
        let task = self.fetch_task(id).await?;

        if task.state != TaskState::Pending {
            return Err(invalid_state(id, "start", task.state));
        }
        if self.run_handle(id).await.is_some() {
            return Ok(());
        }

        self.enqueue(id, &task.kind).await
    }

    /// Apply a control action
    pub async fn action(&self, id: TaskId, action: TaskAction) -> Result<()> {
        match action {
            TaskAction::Pause => self.pause(id).await,
            TaskAction::Resume => self.resume(id).await,
            TaskAction::Retry => self.retry(id).await,
            TaskAction::Cancel => self.cancel(id).await,
        }
    }

    /// Pause a task
    ///
    /// A running task becomes `pausing`: no new items are dispatched, items
    /// already in flight finish, and the task settles as `paused` (or as
    /// `done`/`failed` if nothing was left). A task still waiting for a slot
    /// becomes `paused` directly.
    ///
    /// # Errors
    ///
    /// - `TaskError::NotFound` for unknown IDs
    /// - `TaskError::AlreadyInState` if the task is `pausing` or `paused`
    /// - `TaskError::InvalidState` if the task is `done` or `failed`
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        loop {
            let task = self.fetch_task(id).await?;

            match task.state {
                TaskState::Pending => {
                    if self
                        .db
                        .transition_task_state(id, TaskState::Pending, TaskState::Paused)
                        .await?
                    {
                        if let Some(handle) = self.run_handle(id).await {
                            handle.pause.cancel();
                        }
                        tracing::info!(task_id = id.0, "Queued task paused");
                        self.emit_event(Event::Paused { id });
                        return Ok(());
                    }
                }
                TaskState::Running => {
                    if self
                        .db
                        .transition_task_state(id, TaskState::Running, TaskState::Pausing)
                        .await?
                    {
                        if let Some(handle) = self.run_handle(id).await {
                            handle.pause.cancel();
                        }
                        tracing::info!(task_id = id.0, "Pause requested");
                        self.emit_event(Event::Pausing { id });
                        return Ok(());
                    }
                }
                TaskState::Pausing | TaskState::Paused => {
                    return Err(already_in_state(id, task.state));
                }
                TaskState::Done | TaskState::Failed => {
                    return Err(invalid_state(id, "pause", task.state));
                }
            }
            // Lost a race with the scheduler; look again
        }
    }

    /// Resume a paused task
    ///
    /// The task goes back to `pending` and queues behind the other waiting
    /// tasks of its kind. Only items still `pending` are dispatched.
    ///
    /// # Errors
    ///
    /// - `TaskError::NotFound` for unknown IDs
    /// - `TaskError::AlreadyInState` if the task is `pending` or `running`
    /// - `TaskError::InvalidState` if the task is `pausing` (still draining),
    ///   `done` or `failed`
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        loop {
            let task = self.fetch_task(id).await?;

            match task.state {
                TaskState::Paused => {
                    self.ensure_accepting()?;
                    if self
                        .db
                        .transition_task_state(id, TaskState::Paused, TaskState::Pending)
                        .await?
                    {
                        tracing::info!(task_id = id.0, "Task resumed");
                        self.emit_event(Event::Resumed { id });
                        return self.enqueue(id, &task.kind).await;
                    }
                }
                TaskState::Pending | TaskState::Running => {
                    return Err(already_in_state(id, task.state));
                }
                TaskState::Pausing | TaskState::Done | TaskState::Failed => {
                    return Err(invalid_state(id, "resume", task.state));
                }
            }
        }
    }

    /// Retry the failed items of a failed task
    ///
    /// Only for kinds registered with `safe_repeat`. Failed items go back to
    /// `pending` (errors cleared, progress recounted), the task re-queues, and
    /// items that already succeeded are not touched.
    ///
    /// # Errors
    ///
    /// - `TaskError::NotFound` for unknown IDs
    /// - `TaskError::RetryNotSafe` if the kind's items are not safely
    ///   repeatable; the task is left unchanged
    /// - `TaskError::InvalidState` if the task is not `failed`
    pub async fn retry(&self, id: TaskId) -> Result<()> {
        loop {
            let task = self.fetch_task(id).await?;

            if task.state != TaskState::Failed {
                return Err(invalid_state(id, "retry", task.state));
            }

            let options = self.registry.registration(&task.kind).options;
            if !options.safe_repeat {
                return Err(Error::Task(TaskError::RetryNotSafe {
                    id: id.0,
                    kind: task.kind,
                }));
            }

            self.ensure_accepting()?;
            if let Some(reset) = self.db.requeue_failed_task(id).await? {
                tracing::info!(task_id = id.0, reset_items = reset, "Task retried");
                self.emit_event(Event::Queued {
                    id,
                    kind: task.kind.clone(),
                });
                return self.enqueue(id, &task.kind).await;
            }
        }
    }

    /// Cancel and remove a task
    ///
    /// Works in every non-terminal state. Handlers still in flight are not
    /// interrupted, but their `ItemContext::cancel` token trips and their
    /// results are discarded; `finish()` still runs, `after_done()` does not.
    ///
    /// # Errors
    ///
    /// - `TaskError::NotFound` for unknown IDs
    /// - `TaskError::InvalidState` if the task is `done` or `failed`
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        loop {
            let task = self.fetch_task(id).await?;

            if task.state.is_terminal() {
                return Err(invalid_state(id, "cancel", task.state));
            }

            if self.db.delete_task(id).await? {
                if let Some(handle) = self.run_handle(id).await {
                    handle.cancel.cancel();
                }
                tracing::info!(task_id = id.0, state = %task.state, "Task cancelled");
                self.emit_event(Event::Removed { id });
                return Ok(());
            }
        }
    }

    pub(crate) async fn fetch_task(&self, id: TaskId) -> Result<Task> {
        self.db
            .get_task(id)
            .await?
            .ok_or(Error::Task(TaskError::NotFound { id: id.0 }))
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.run_state.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}

fn already_in_state(id: TaskId, state: TaskState) -> Error {
    Error::Task(TaskError::AlreadyInState {
        id: id.0,
        state: state.to_string(),
    })
}

fn invalid_state(id: TaskId, operation: impl Into<String>, state: TaskState) -> Error {
    Error::Task(TaskError::InvalidState {
        id: id.0,
        operation: operation.into(),
        current_state: state.to_string(),
    })
}
