//! Core types for records-tasks

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a task
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Stored as a plain INTEGER column
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created or re-queued, waiting for a slot in the kind's task budget
    Pending,
    /// Items are being dispatched
    Running,
    /// Stopped with pending items left; resumable
    Paused,
    /// Pause requested; in-flight items are draining
    Pausing,
    /// Setup failed, at least one item failed, or a restart interrupted the run
    Failed,
    /// Every item finished successfully
    Done,
}

impl TaskState {
    /// All states, in storage order
    pub const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Paused,
        TaskState::Pausing,
        TaskState::Failed,
        TaskState::Done,
    ];

    /// Convert integer state code to TaskState
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Paused,
            3 => TaskState::Pausing,
            4 => TaskState::Failed,
            5 => TaskState::Done,
            _ => TaskState::Failed, // unknown codes surface as failures
        }
    }

    /// Convert TaskState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Paused => 2,
            TaskState::Pausing => 3,
            TaskState::Failed => 4,
            TaskState::Done => 5,
        }
    }

    /// Lowercase name, as used in the API and in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Pausing => "pausing",
            TaskState::Failed => "failed",
            TaskState::Done => "done",
        }
    }

    /// `done` and `failed` are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown task state: {s}"))
    }
}

/// Item state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Not yet attempted (or reset by retry)
    Pending,
    /// Handed to the handler
    Running,
    /// Handler returned success
    Done,
    /// Handler returned an error or panicked
    Failed,
}

impl ItemState {
    /// Convert integer state code to ItemState
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => ItemState::Pending,
            1 => ItemState::Running,
            2 => ItemState::Done,
            3 => ItemState::Failed,
            _ => ItemState::Failed,
        }
    }

    /// Convert ItemState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            ItemState::Pending => 0,
            ItemState::Running => 1,
            ItemState::Done => 2,
            ItemState::Failed => 3,
        }
    }

    /// `done` and `failed` are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed)
    }
}

/// Task progress: terminal items over total items
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Progress {
    /// Items in a terminal state (done or failed)
    pub done: u64,
    /// Total number of items
    pub total: u64,
}

/// Opaque job-kind-specific payload, stored as JSON
///
/// The engine never looks inside; each job kind decodes it at its own boundary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct Payload(pub serde_json::Value);

impl Payload {
    /// Serialize a typed value into a payload
    pub fn encode<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deserialize the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Empty payload (JSON `null`)
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A task as seen by observers and handlers
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Submission process the task belongs to
    pub process_id: String,

    /// Job kind, the registry lookup key
    pub kind: String,

    /// Current state
    pub state: TaskState,

    /// Items finished over items total
    pub progress: Progress,

    /// Failure summary, set only when the task failed
    pub error: Option<String>,

    /// User who triggered the task, if any
    pub user_id: Option<String>,

    /// Job-kind payload
    pub data: Payload,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Last state or progress change
    pub updated_at: DateTime<Utc>,
}

/// One unit of work inside a task
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskItem {
    /// Row identifier
    pub id: i64,

    /// Owning task
    pub task_id: TaskId,

    /// Insertion order within the task
    pub position: i64,

    /// Human-readable label used in failure summaries
    pub label: String,

    /// Current state
    pub state: ItemState,

    /// Failure message, set only when the item failed
    pub error: Option<String>,

    /// Job-kind item payload
    pub data: Payload,

    /// Last state change
    pub updated_at: DateTime<Utc>,
}

/// A task together with its items
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskDetail {
    /// The task
    #[serde(flatten)]
    pub task: Task,

    /// Items in insertion order
    pub items: Vec<TaskItem>,
}

/// Input for creating a task
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewTask {
    /// Submission process the task belongs to
    pub process_id: String,
    /// Job kind; must be registered
    pub kind: String,
    /// User who triggered the task
    pub user_id: Option<String>,
    /// Job-kind payload
    pub data: Payload,
    /// Items in execution order
    pub items: Vec<NewTaskItem>,
}

impl NewTask {
    /// Start a task description for the given process and job kind
    pub fn new(process_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Set the triggering user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the job-kind payload
    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    /// Append an item
    pub fn with_item(mut self, label: impl Into<String>, data: Payload) -> Self {
        self.items.push(NewTaskItem {
            label: label.into(),
            data,
        });
        self
    }
}

/// Input for creating one item
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTaskItem {
    /// Label used in failure summaries
    pub label: String,
    /// Job-kind item payload
    pub data: Payload,
}

/// Control action on an existing task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Stop dispatching items; in-flight items finish
    Pause,
    /// Re-admit a paused task
    Resume,
    /// Re-run failed items of a failed task (safe-repeat kinds only)
    Retry,
    /// Remove the task
    Cancel,
}

impl TaskAction {
    /// Lowercase name used in URLs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Retry => "retry",
            TaskAction::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(TaskAction::Pause),
            "resume" => Ok(TaskAction::Resume),
            "retry" => Ok(TaskAction::Retry),
            "cancel" => Ok(TaskAction::Cancel),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Number of tasks per state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskCounts {
    /// Waiting for admission
    pub pending: u64,
    /// Executing
    pub running: u64,
    /// Paused
    pub paused: u64,
    /// Draining towards paused
    pub pausing: u64,
    /// Failed
    pub failed: u64,
    /// Done
    pub done: u64,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task persisted and waiting for admission
    Queued {
        /// Task ID
        id: TaskId,
        /// Job kind
        kind: String,
    },

    /// Task admitted and running
    Started {
        /// Task ID
        id: TaskId,
    },

    /// An item reached a terminal state
    Progress {
        /// Task ID
        id: TaskId,
        /// Items finished
        done: u64,
        /// Items total
        total: u64,
    },

    /// Pause requested on a running task
    Pausing {
        /// Task ID
        id: TaskId,
    },

    /// Task paused
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Paused task re-queued
    Resumed {
        /// Task ID
        id: TaskId,
    },

    /// Every item done
    Done {
        /// Task ID
        id: TaskId,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure summary
        error: String,
    },

    /// Task cancelled and removed
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Task failed by startup recovery after an interrupted run
    Recovered {
        /// Task ID
        id: TaskId,
    },

    /// Engine shutting down
    Shutdown,
}
