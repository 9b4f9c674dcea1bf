//! Per-kind admission: FIFO queue in front of the kind's task budget.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};

use super::{RunHandle, TaskEngine};
use crate::error::{Error, Result};
use crate::types::TaskId;

/// A pending task waiting for a slot
#[derive(Debug)]
pub(crate) struct Admission {
    pub(crate) id: TaskId,
    pub(crate) handle: RunHandle,
}

impl TaskEngine {
    /// Queue a `pending` task behind the other pending tasks of its kind
    ///
    /// # Panics
    ///
    /// Panics if `kind` is not registered.
    pub(crate) async fn enqueue(&self, id: TaskId, kind: &str) -> Result<()> {
        let _ = self.registry.registration(kind);
        let Some(lane) = self.run_state.lanes.get(kind) else {
            return Err(Error::ShuttingDown);
        };

        let handle = self.next_handle();
        let run_id = handle.run_id;
        self.run_state
            .active_runs
            .lock()
            .await
            .insert(id, handle.clone());

        if lane.send(Admission { id, handle }).is_err() {
            // Dispatcher already stopped; the task stays pending for the next start
            self.release_run(id, run_id).await;
            return Err(Error::ShuttingDown);
        }

        tracing::debug!(task_id = id.0, kind = %kind, run_id, "Task queued for admission");
        Ok(())
    }

    /// Start the admission loop of one job kind
    ///
    /// The loop takes queued tasks strictly in order, waits for a slot in the
    /// kind's budget of `concurrent_tasks`, and spawns the run holding that
    /// slot. A task paused or cancelled while waiting gives up its place
    /// without taking a slot.
    pub(crate) fn start_dispatcher(
        &self,
        kind: String,
        mut rx: mpsc::UnboundedReceiver<Admission>,
    ) {
        let concurrent_tasks = self.registry.registration(&kind).options.concurrent_tasks;
        let budget = Arc::new(Semaphore::new(concurrent_tasks));
        let shutdown = self.run_state.shutdown.clone();
        let engine = self.clone();

        tokio::spawn(async move {
            loop {
                let admission = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(admission) => admission,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = admission.handle.cancel.cancelled() => None,
                    _ = admission.handle.pause.cancelled() => None,
                    permit = budget.clone().acquire_owned() => permit.ok(),
                };

                let Some(permit) = permit else {
                    tracing::debug!(
                        task_id = admission.id.0,
                        kind = %kind,
                        "Task left the admission queue before starting"
                    );
                    engine
                        .release_run(admission.id, admission.handle.run_id)
                        .await;
                    continue;
                };

                let engine = engine.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    engine.execute_run(admission).await;
                });
            }

            tracing::debug!(kind = %kind, "Dispatcher stopped");
        });
    }
}
