//! Common test utilities for records-tasks integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use records_tasks::{
    Config, Error, HandlerFactory, ItemContext, ItemHandler, Options, Payload, Registry, Result,
    ItemState, Task, TaskEngine, TaskId, TaskState,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Job kind used by the integration tests
pub const COPY_KIND: &str = "copy-records";

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Item payload: write `contents` to `name` inside the export directory
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CopyRecord {
    pub name: String,
    pub contents: String,
    /// Block until the gate hands out a permit
    #[serde(default)]
    pub gated: bool,
}

/// Writes every item into an export directory
pub struct CopyFactory {
    export_dir: PathBuf,
    gate: Arc<Semaphore>,
    copied: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<Vec<(TaskId, TaskState)>>>,
}

impl CopyFactory {
    pub fn new(export_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            export_dir: export_dir.to_path_buf(),
            gate: Arc::new(Semaphore::new(0)),
            copied: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Let `n` gated items proceed
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<(TaskId, TaskState)> {
        self.finished.lock().unwrap().clone()
    }
}

struct CopyHandler {
    export_dir: PathBuf,
    gate: Arc<Semaphore>,
    copied: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<Vec<(TaskId, TaskState)>>>,
}

#[async_trait]
impl HandlerFactory for CopyFactory {
    async fn build(&self, _task: &Task) -> Result<Arc<dyn ItemHandler>> {
        tokio::fs::create_dir_all(&self.export_dir).await?;
        Ok(Arc::new(CopyHandler {
            export_dir: self.export_dir.clone(),
            gate: Arc::clone(&self.gate),
            copied: Arc::clone(&self.copied),
            finished: Arc::clone(&self.finished),
        }))
    }
}

#[async_trait]
impl ItemHandler for CopyHandler {
    async fn handle_item(&self, _ctx: &ItemContext, data: &Payload) -> Result<()> {
        let record: CopyRecord = data.decode()?;
        if record.gated {
            self.gate.acquire().await.unwrap().forget();
        }
        if record.contents.is_empty() {
            return Err(Error::Handler(format!("{} has no contents", record.name)));
        }
        tokio::fs::write(self.export_dir.join(&record.name), &record.contents).await?;
        self.copied.lock().unwrap().push(record.name);
        Ok(())
    }

    async fn after_done(&self, task: &Task) -> Result<()> {
        self.finished.lock().unwrap().push((task.id, task.state));
        Ok(())
    }
}

/// Item payload for `name`
pub fn record(name: &str, contents: &str, gated: bool) -> Payload {
    Payload::encode(&CopyRecord {
        name: name.to_string(),
        contents: contents.to_string(),
        gated,
    })
    .unwrap()
}

/// Engine over `dir/tasks.db` running the copy job kind
pub async fn start_engine(dir: &Path, factory: Arc<CopyFactory>, options: Options) -> TaskEngine {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("tasks.db");
    config.engine.shutdown_timeout = Duration::from_secs(5);

    let mut registry = Registry::new();
    registry.register(COPY_KIND, factory, options).unwrap();

    TaskEngine::new(config, registry).await.unwrap()
}

/// Poll until the task reaches `state`
pub async fn wait_for_state(engine: &TaskEngine, id: TaskId, state: TaskState) -> Task {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let task = engine.get_task(id).await.unwrap().task;
        if task.state == state {
            return task;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for task {id} to reach {state}, still {}", task.state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `condition` holds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the item at `index` has been handed to the handler
pub async fn wait_for_item_running(engine: &TaskEngine, id: TaskId, index: usize) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let detail = engine.get_task(id).await.unwrap();
        if detail.items[index].state == ItemState::Running {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for item {index} of task {id} to start");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
