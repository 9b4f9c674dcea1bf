//! Item scheduler: runs the items of one admitted task through one handler.
//!
//! A run goes through these phases:
//! 1. build the handler (failure fails the task, nothing else runs)
//! 2. dispatch `pending` items through a pool of `concurrent_items` workers,
//!    persisting each terminal item state together with the progress bump
//! 3. `finish()` once the pool is drained
//! 4. park the task (pause or shutdown with work left), or record
//!    `done`/`failed` and hand the final snapshot to `after_done()`

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use tokio::task::JoinSet;

use super::dispatcher::Admission;
use super::registry::{ItemContext, ItemHandler};
use super::{RunHandle, TaskEngine};
use crate::error::{Error, Result};
use crate::types::{Event, ItemState, TaskId, TaskItem, TaskState};

impl TaskEngine {
    /// Run an admitted task, holding its slot until this returns
    pub(crate) async fn execute_run(&self, admission: Admission) {
        let Admission { id, handle } = admission;

        // A newer run of the same task replaced this one while it was queued
        let current = self
            .run_handle(id)
            .await
            .is_some_and(|h| h.run_id == handle.run_id);
        if !current {
            tracing::debug!(task_id = id.0, run_id = handle.run_id, "Skipping stale run");
            return;
        }

        match self
            .db
            .transition_task_state(id, TaskState::Pending, TaskState::Running)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id = id.0, "Task no longer pending at admission");
                self.release_run(id, handle.run_id).await;
                return;
            }
            Err(e) => {
                tracing::error!(task_id = id.0, error = %e, "Failed to admit task");
                self.release_run(id, handle.run_id).await;
                return;
            }
        }

        handle.admitted.store(true, Ordering::SeqCst);
        self.emit_event(Event::Started { id });
        tracing::info!(task_id = id.0, "Task started");

        if let Err(e) = self.run_items(id, &handle).await {
            tracing::error!(task_id = id.0, error = %e, "Task run aborted");
            let message = format!("run aborted: {}", e);
            match self
                .db
                .set_task_outcome(id, TaskState::Failed, Some(&message))
                .await
            {
                Ok(true) => self.emit_event(Event::Failed { id, error: message }),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(task_id = id.0, error = %e, "Failed to record aborted run")
                }
            }
        }

        self.release_run(id, handle.run_id).await;
    }

    async fn run_items(&self, id: TaskId, handle: &RunHandle) -> Result<()> {
        let Some(task) = self.db.get_task(id).await? else {
            return Ok(());
        };
        let registration = self.registry.registration(&task.kind).clone();

        let handler = match AssertUnwindSafe(registration.factory.build(&task))
            .catch_unwind()
            .await
        {
            Ok(Ok(handler)) => handler,
            Ok(Err(e)) => return self.fail_setup(id, e.to_string()).await,
            Err(panic) => return self.fail_setup(id, panic_message(panic)).await,
        };

        let drained = self
            .dispatch_items(id, &handler, registration.options.concurrent_items, handle)
            .await;

        if AssertUnwindSafe(handler.finish()).catch_unwind().await.is_err() {
            tracing::error!(task_id = id.0, "Handler panicked in finish");
        }

        drained?;

        if handle.cancel.is_cancelled() {
            tracing::info!(task_id = id.0, "Task cancelled, in-flight results discarded");
            return Ok(());
        }

        let stopped = handle.pause.is_cancelled() || self.run_state.shutdown.is_cancelled();
        if stopped && !self.db.pending_items(id).await?.is_empty() {
            return self.park(id, handle).await;
        }

        self.complete(id, handler).await
    }

    /// Bounded worker pool over the task's pending items
    ///
    /// A store error stops further dispatch, but items already handed to the
    /// handler always run to completion. Items whose result could not be
    /// recorded are marked `failed` once the pool is empty, and the first
    /// store error is returned after that.
    async fn dispatch_items(
        &self,
        id: TaskId,
        handler: &Arc<dyn ItemHandler>,
        width: usize,
        handle: &RunHandle,
    ) -> Result<()> {
        let mut pending = self.db.pending_items(id).await?.into_iter();
        let mut in_flight: JoinSet<(TaskItem, std::result::Result<(), String>)> = JoinSet::new();
        let mut running: HashSet<i64> = HashSet::new();
        let mut unrecorded: Vec<(i64, String)> = Vec::new();
        let mut store_error: Option<Error> = None;

        loop {
            while store_error.is_none() && in_flight.len() < width && !self.stop_requested(handle)
            {
                let Some(item) = pending.next() else {
                    break;
                };
                match self.db.mark_item_running(item.id).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::error!(
                            task_id = id.0,
                            item = %item.label,
                            error = %e,
                            "Failed to mark item running, dispatch stopped"
                        );
                        store_error = Some(e);
                        break;
                    }
                }

                tracing::debug!(task_id = id.0, item = %item.label, "Dispatching item");
                running.insert(item.id);

                let ctx = ItemContext {
                    task_id: id,
                    item_id: item.id,
                    label: item.label.clone(),
                    cancel: handle.cancel.clone(),
                };
                let handler = Arc::clone(handler);
                in_flight.spawn(async move {
                    let outcome = AssertUnwindSafe(handler.handle_item(&ctx, &item.data))
                        .catch_unwind()
                        .await;
                    let outcome = match outcome {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(non_empty(e.to_string())),
                        Err(panic) => Err(panic_message(panic)),
                    };
                    (item, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (item, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    // The item is left in `running` and picked up below
                    tracing::error!(task_id = id.0, error = %e, "Item worker aborted");
                    continue;
                }
            };
            running.remove(&item.id);

            if handle.cancel.is_cancelled() {
                continue;
            }

            let (state, error) = match outcome {
                Ok(()) => (ItemState::Done, None),
                Err(message) => {
                    tracing::warn!(task_id = id.0, item = %item.label, error = %message, "Item failed");
                    (ItemState::Failed, Some(message))
                }
            };

            match self
                .db
                .finish_item(id, item.id, state, error.as_deref())
                .await
            {
                Ok(Some(progress)) => self.emit_event(Event::Progress {
                    id,
                    done: progress.done,
                    total: progress.total,
                }),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        task_id = id.0,
                        item = %item.label,
                        error = %e,
                        "Failed to record item result"
                    );
                    unrecorded.push((item.id, format!("result not recorded: {}", e)));
                    store_error.get_or_insert(e);
                }
            }
        }

        if !handle.cancel.is_cancelled() {
            unrecorded.extend(
                running
                    .into_iter()
                    .map(|item_id| (item_id, "item worker aborted".to_string())),
            );
            for (item_id, message) in unrecorded {
                if let Err(e) = self
                    .db
                    .finish_item(id, item_id, ItemState::Failed, Some(&message))
                    .await
                {
                    tracing::error!(task_id = id.0, item_id, error = %e, "Failed to mark item failed");
                    store_error.get_or_insert(e);
                }
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop_requested(&self, handle: &RunHandle) -> bool {
        handle.pause.is_cancelled()
            || handle.cancel.is_cancelled()
            || self.run_state.shutdown.is_cancelled()
    }

    async fn fail_setup(&self, id: TaskId, error: String) -> Result<()> {
        let error = non_empty(error);
        tracing::warn!(task_id = id.0, error = %error, "Handler setup failed");

        if self
            .db
            .set_task_outcome(id, TaskState::Failed, Some(&error))
            .await?
        {
            self.emit_event(Event::Failed { id, error });
        }
        Ok(())
    }

    /// Stop with pending items left
    ///
    /// A user pause parks the task as `paused`. A shutdown returns it to
    /// `pending` so the next session re-admits it.
    async fn park(&self, id: TaskId, handle: &RunHandle) -> Result<()> {
        if handle.pause.is_cancelled() {
            if self
                .db
                .transition_task_state(id, TaskState::Pausing, TaskState::Paused)
                .await?
            {
                tracing::info!(task_id = id.0, "Task paused");
                self.emit_event(Event::Paused { id });
            }
            return Ok(());
        }

        for from in [TaskState::Pausing, TaskState::Running] {
            if self
                .db
                .transition_task_state(id, from, TaskState::Pending)
                .await?
            {
                tracing::info!(task_id = id.0, "Task returned to queue for next start");
                break;
            }
        }
        Ok(())
    }

    /// Record `done`/`failed` and run `after_done`
    async fn complete(&self, id: TaskId, handler: Arc<dyn ItemHandler>) -> Result<()> {
        let items = self.db.get_task_items(id).await?;
        let failures: Vec<String> = items
            .iter()
            .filter(|item| item.state != ItemState::Done)
            .map(|item| {
                format!(
                    "{}: {}",
                    item.label,
                    item.error.as_deref().unwrap_or("not completed")
                )
            })
            .collect();

        let (state, error) = if failures.is_empty() {
            (TaskState::Done, None)
        } else {
            (TaskState::Failed, Some(failures.join("\n")))
        };

        if !self
            .db
            .set_task_outcome(id, state, error.as_deref())
            .await?
        {
            // Removed while finishing
            return Ok(());
        }

        match &error {
            None => {
                tracing::info!(task_id = id.0, "Task done");
                self.emit_event(Event::Done { id });
            }
            Some(error) => {
                tracing::warn!(task_id = id.0, failed_items = failures.len(), "Task failed");
                self.emit_event(Event::Failed {
                    id,
                    error: error.clone(),
                });
            }
        }

        let Some(mut task) = self.db.get_task(id).await? else {
            return Ok(());
        };
        // A retry may already have re-queued the task; report this run's outcome
        task.state = state;
        task.error = error;

        match AssertUnwindSafe(handler.after_done(&task))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(task_id = id.0, error = %e, "after_done failed");
            }
            Err(panic) => {
                tracing::error!(
                    task_id = id.0,
                    error = %panic_message(panic),
                    "after_done panicked"
                );
            }
        }

        Ok(())
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "failed without a message".to_string()
    } else {
        message
    }
}

/// Turn a caught panic payload into an item error
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
