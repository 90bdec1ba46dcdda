//! Task identity, kind and lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Process-unique task identifier (UUID v4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// waiting --start--> running --ok--> finished
///                            --err--> error
///                            --deadline--> timed_out
/// waiting|running --cancel--> canceled
/// finished|error|timed_out --scheduler has a next run--> waiting
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, waiting for its eligible time.
    Waiting,
    /// Handed to a worker.
    Running,
    /// Callable returned normally.
    Finished,
    /// Callable failed, panicked, or was interrupted by a restart.
    Error,
    /// Callable exceeded its timeout.
    TimedOut,
    /// Cancelled before or during execution.
    Canceled,
}

impl TaskState {
    /// All terminal states.
    pub const COMPLETE: [TaskState; 4] = [
        TaskState::Finished,
        TaskState::Error,
        TaskState::TimedOut,
        TaskState::Canceled,
    ];

    /// Returns true for `finished`, `error`, `timed_out` and `canceled`.
    pub fn is_complete(&self) -> bool {
        Self::COMPLETE.contains(self)
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Error => "error",
            TaskState::TimedOut => "timed_out",
            TaskState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a task: a plain task or one carrying a domain payload.
///
/// The payload travels with the task through snapshots so that domain layers
/// (sync jobs, uploads, ...) get their own task kind back after a restart.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Plain task.
    #[default]
    Generic,
    /// Domain-specific task.
    Domain {
        /// Domain kind name, e.g. `"repo_sync"`.
        kind: String,
        /// Domain data.
        payload: Value,
    },
}

impl TaskKind {
    /// Name used for searching and logging.
    pub fn name(&self) -> &str {
        match self {
            TaskKind::Generic => "generic",
            TaskKind::Domain { kind, .. } => kind,
        }
    }
}
