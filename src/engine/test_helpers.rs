//! Shared test helpers for creating TaskEngine instances in tests.
//!
//! `ScriptedFactory` builds handlers whose behavior is driven by each item's
//! payload (`{"outcome": "ok" | "fail" | "flaky" | "panic", "hold": bool}`),
//! and records everything the engine did to them in a shared [`Recorder`].

use crate::config::Config;
use crate::engine::{HandlerFactory, ItemContext, ItemHandler, Options, Registry, TaskEngine};
use crate::error::{Error, Result};
use crate::types::{NewTask, Payload, Task, TaskId, TaskState};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;

/// Job kind used by most engine tests
pub(crate) const TEST_KIND: &str = "test";

/// How long polling helpers wait before failing the test
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the engine did to the scripted handlers
pub(crate) struct Recorder {
    /// Labels in the order `handle_item` was entered
    pub(crate) started: Mutex<Vec<String>>,
    /// Tasks in the order their handler was built
    pub(crate) built: Mutex<Vec<TaskId>>,
    pub(crate) in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    pub(crate) active_tasks: AtomicUsize,
    pub(crate) max_active_tasks: AtomicUsize,
    pub(crate) finish_calls: AtomicUsize,
    /// Snapshot state passed to each `after_done`
    pub(crate) after_done: Mutex<Vec<(TaskId, TaskState)>>,
    /// Held items that saw their cancel token tripped once released
    pub(crate) cancel_seen: AtomicUsize,
    /// Held items wait for one permit each
    pub(crate) gate: Semaphore,
    /// Make `build` fail
    pub(crate) fail_build: AtomicBool,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            built: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_active_tasks: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
            after_done: Mutex::new(Vec::new()),
            cancel_seen: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            fail_build: AtomicBool::new(false),
        })
    }

    /// Let `n` held items continue
    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn built(&self) -> Vec<TaskId> {
        self.built.lock().unwrap().clone()
    }

    pub(crate) fn after_done(&self) -> Vec<(TaskId, TaskState)> {
        self.after_done.lock().unwrap().clone()
    }

    pub(crate) fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` items have entered `handle_item`
    pub(crate) async fn wait_started(&self, n: usize) {
        wait_until(&format!("{n} items started"), || self.started().len() >= n).await;
    }
}

fn raise_max(max: &AtomicUsize, current: usize) {
    max.fetch_max(current, Ordering::SeqCst);
}

pub(crate) struct ScriptedFactory {
    recorder: Arc<Recorder>,
}

impl ScriptedFactory {
    pub(crate) fn new(recorder: Arc<Recorder>) -> Arc<Self> {
        Arc::new(Self { recorder })
    }
}

#[async_trait]
impl HandlerFactory for ScriptedFactory {
    async fn build(&self, task: &Task) -> Result<Arc<dyn ItemHandler>> {
        if self.recorder.fail_build.load(Ordering::SeqCst) {
            return Err(Error::Handler("archive target unreachable".to_string()));
        }
        self.recorder.built.lock().unwrap().push(task.id);
        let active = self.recorder.active_tasks.fetch_add(1, Ordering::SeqCst) + 1;
        raise_max(&self.recorder.max_active_tasks, active);

        Ok(Arc::new(ScriptedHandler {
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct ScriptedHandler {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl ItemHandler for ScriptedHandler {
    async fn handle_item(&self, ctx: &ItemContext, data: &Payload) -> Result<()> {
        let attempt = {
            let mut started = self.recorder.started.lock().unwrap();
            started.push(ctx.label.clone());
            started.iter().filter(|label| **label == ctx.label).count()
        };
        let current = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        raise_max(&self.recorder.max_in_flight, current);

        if data.0["hold"].as_bool().unwrap_or(false) {
            self.recorder.gate.acquire().await.unwrap().forget();
            if ctx.is_cancelled() {
                self.recorder.cancel_seen.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);

        match data.0["outcome"].as_str().unwrap_or("ok") {
            "fail" => Err(Error::Handler("unsupported format".to_string())),
            "flaky" if attempt == 1 => Err(Error::Handler("analyzer timed out".to_string())),
            "panic" => panic!("corrupt header"),
            _ => Ok(()),
        }
    }

    async fn finish(&self) {
        self.recorder.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.recorder.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }

    async fn after_done(&self, task: &Task) -> Result<()> {
        self.recorder.after_done.lock().unwrap().push((task.id, task.state));
        Ok(())
    }
}

/// Payload of a scripted item
pub(crate) fn item(outcome: &str, hold: bool) -> Payload {
    Payload::from(json!({ "outcome": outcome, "hold": hold }))
}

/// Task of `kind` with one scripted item per `(label, outcome, hold)`
pub(crate) fn scripted_task(kind: &str, items: &[(&str, &str, bool)]) -> NewTask {
    items.iter().fold(
        NewTask::new("process-1", kind).with_user("alice"),
        |task, (label, outcome, hold)| task.with_item(*label, item(outcome, *hold)),
    )
}

/// Registry holding the scripted kind under `TEST_KIND`
pub(crate) fn scripted_registry(recorder: &Arc<Recorder>, options: Options) -> Registry {
    let mut registry = Registry::new();
    registry
        .register(TEST_KIND, ScriptedFactory::new(Arc::clone(recorder)), options)
        .unwrap();
    registry
}

/// Helper to create a test TaskEngine instance with a persistent database.
/// Returns the engine and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine(registry: Registry) -> (TaskEngine, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let engine = create_test_engine_at(temp_dir.path(), registry).await;
    (engine, temp_dir)
}

/// Engine on `dir/test.db`, for restarting over the same store
pub(crate) async fn create_test_engine_at(dir: &Path, registry: Registry) -> TaskEngine {
    TaskEngine::new(test_config(dir), registry).await.unwrap()
}

pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.engine.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Poll until `condition` holds, failing the test after a timeout
pub(crate) async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the store until the task reaches `state`
pub(crate) async fn wait_for_state(engine: &TaskEngine, id: TaskId, state: TaskState) -> Task {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let task = engine.db.get_task(id).await.unwrap();
        if let Some(task) = task
            && task.state == state
        {
            return task;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for task {id} to reach {state}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
