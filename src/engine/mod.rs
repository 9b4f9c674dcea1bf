//! Task engine split into focused submodules.
//!
//! The `TaskEngine` struct and its methods are organized by domain:
//! - [`registry`] - Job kinds, handler contract and per-kind options
//! - [`dispatcher`] - Per-kind FIFO admission under the task budget
//! - [`scheduler`] - Bounded-parallel item execution for one run
//! - [`control`] - `run`, `start` and the pause/resume/retry/cancel actions
//! - [`queries`] - Read views for progress display
//! - [`recovery`] - Startup recovery and restore of queued tasks
//! - [`lifecycle`] - Graceful shutdown

mod control;
mod dispatcher;
mod lifecycle;
mod queries;
mod recovery;
pub mod registry;
mod scheduler;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use recovery::INTERRUPTED_BY_RESTART;
pub use registry::{HandlerFactory, ItemContext, ItemHandler, Options, Registration, Registry};

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::types::{Event, TaskId};
use dispatcher::Admission;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Control handle of one run of one task
///
/// A task gets a fresh handle each time it is queued, so a late cleanup of an
/// earlier run never removes the handle of a later one.
#[derive(Clone, Debug)]
pub(crate) struct RunHandle {
    pub(crate) run_id: u64,
    /// Stop dispatching, let in-flight items finish, park the task as paused
    pub(crate) pause: CancellationToken,
    /// Stop dispatching, discard in-flight results; passed to handlers
    pub(crate) cancel: CancellationToken,
    /// Set once the run holds a slot and the task is `running`
    pub(crate) admitted: Arc<AtomicBool>,
}

impl RunHandle {
    fn new(run_id: u64) -> Self {
        Self {
            run_id,
            pause: CancellationToken::new(),
            cancel: CancellationToken::new(),
            admitted: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Admission and run bookkeeping
#[derive(Clone)]
pub(crate) struct RunState {
    /// Per-kind admission queues, one dispatcher loop each
    pub(crate) lanes: Arc<HashMap<String, mpsc::UnboundedSender<Admission>>>,
    /// Handles of every queued or running task
    pub(crate) active_runs: Arc<Mutex<HashMap<TaskId, RunHandle>>>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Tripped by shutdown; runs return their remaining work to the queue
    pub(crate) shutdown: CancellationToken,
    next_run_id: Arc<AtomicU64>,
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TaskEngine {
    /// Task store, public so callers and tests can read task state directly
    pub db: Arc<Database>,
    /// Frozen job kind table
    pub(crate) registry: Arc<Registry>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    pub(crate) run_state: RunState,
}

impl TaskEngine {
    /// Create a new TaskEngine
    ///
    /// Opens (or creates) the task store, runs startup recovery, marks a
    /// clean start, starts one dispatcher per registered job kind, and
    /// re-queues tasks left `pending` by the previous session.
    pub async fn new(config: Config, registry: Registry) -> Result<Self> {
        let db = Database::new(&config.persistence.database_path).await?;

        let (event_tx, _rx) = broadcast::channel(config.engine.event_buffer.max(1));

        let mut lanes = HashMap::new();
        let mut receivers = Vec::new();
        for kind in registry.kinds() {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(kind.to_string(), tx);
            receivers.push((kind.to_string(), rx));
        }

        let engine = Self {
            db: Arc::new(db),
            registry: Arc::new(registry),
            event_tx,
            config: Arc::new(config),
            run_state: RunState {
                lanes: Arc::new(lanes),
                active_runs: Arc::new(Mutex::new(HashMap::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown: CancellationToken::new(),
                next_run_id: Arc::new(AtomicU64::new(1)),
            },
        };

        engine.recover().await?;
        engine.db.set_clean_start().await?;

        for (kind, rx) in receivers {
            engine.start_dispatcher(kind, rx);
        }

        engine.restore_pending().await?;

        Ok(engine)
    }

    /// Subscribe to task events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than `engine.event_buffer` events behind gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Registered job kinds
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let engine = Arc::new(self.clone());
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(engine, config).await })
    }

    fn next_handle(&self) -> RunHandle {
        RunHandle::new(self.run_state.next_run_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Drop the handle of a finished run, unless a newer run replaced it
    pub(crate) async fn release_run(&self, id: TaskId, run_id: u64) {
        let mut active = self.run_state.active_runs.lock().await;
        if active.get(&id).is_some_and(|h| h.run_id == run_id) {
            active.remove(&id);
        }
    }

    /// Current handle of a task, if it is queued or running
    pub(crate) async fn run_handle(&self, id: TaskId) -> Option<RunHandle> {
        self.run_state.active_runs.lock().await.get(&id).cloned()
    }
}
