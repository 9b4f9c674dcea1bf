//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TaskEngine;
use crate::error::Result;
use crate::types::{Event, TaskId, TaskState};

/// How often shutdown checks whether admitted runs have drained
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl TaskEngine {
    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting new tasks and actions that would queue work
    /// 2. Moves running tasks to `pausing` and stops all dispatchers
    /// 3. Waits up to `engine.shutdown_timeout` for in-flight items to finish;
    ///    runs with items left return their task to `pending`
    /// 4. Marks a clean shutdown and emits `Event::Shutdown`
    ///
    /// Tasks still running when the timeout expires are failed by recovery
    /// on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.run_state.accepting_new.store(false, Ordering::SeqCst);

        let admitted: Vec<TaskId> = {
            let active = self.run_state.active_runs.lock().await;
            active
                .iter()
                .filter(|(_, handle)| handle.admitted.load(Ordering::SeqCst))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &admitted {
            match self
                .db
                .transition_task_state(*id, TaskState::Running, TaskState::Pausing)
                .await
            {
                Ok(true) => self.emit_event(Event::Pausing { id: *id }),
                Ok(false) => {}
                Err(e) => tracing::warn!(task_id = id.0, error = %e, "Failed to mark task pausing"),
            }
        }

        self.run_state.shutdown.cancel();
        tracing::info!(running = admitted.len(), "Signaled shutdown to all runs");

        let timeout = self.config.engine.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_for_admitted_runs())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for runs to drain, proceeding with shutdown"
            );
        } else {
            tracing::info!("All runs drained");
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        !self.run_state.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_admitted_runs(&self) {
        loop {
            let running = {
                let active = self.run_state.active_runs.lock().await;
                active
                    .values()
                    .filter(|handle| handle.admitted.load(Ordering::SeqCst))
                    .count()
            };

            if running == 0 {
                return;
            }

            tracing::debug!(running, "Waiting for runs to drain");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
