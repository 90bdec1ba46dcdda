//! Error types used by the task queue, its storage, and task executions.
//!
//! - [`QueueError`]: synchronous failures of [`TaskQueue`](crate::TaskQueue) operations.
//! - [`StorageError`]: failures raised by a [`Storage`](crate::Storage) implementation.
//! - [`SnapshotError`]: a snapshot could not be turned back into a task.
//! - [`TaskError`]: outcome of a callable's execution; captured into task state, never raised.
//! - [`RuntimeError`]: failures of the dispatch runtime itself (shutdown).
//!
//! Every enum provides `as_label` returning a short stable snake_case label for logs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tasks::{TaskId, TaskState};

/// # Errors produced by queue operations.
///
/// Only these are surfaced to callers of `enqueue`/`find`/`exists`/`cancel`/`remove`.
/// Nothing about a task's own execution failure is raised here; inspect the task's state instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    /// `enqueue(.., unique = true)` found an equivalent waiting or running task.
    #[error("non-unique task {id}: duplicates {existing}")]
    NonUniqueTask {
        /// Task that was rejected.
        id: TaskId,
        /// Already queued task with the same fingerprint and scheduler.
        existing: TaskId,
    },

    /// A criteria key does not name a searchable task field.
    #[error("unknown criteria field {field:?}")]
    UnknownCriteria {
        /// The offending field name.
        field: String,
    },

    /// The task is not in a state that allows the requested operation.
    #[error("task {id} is {state}; operation not allowed in this state")]
    InvalidState {
        /// Task id.
        id: TaskId,
        /// Its current state.
        state: TaskState,
    },

    /// The task's scheduler offered no eligible time at all.
    #[error("scheduler of task {id} is exhausted before its first run")]
    ScheduleExhausted {
        /// Task id.
        id: TaskId,
    },

    /// The task is neither waiting nor running in this queue.
    #[error("task {id} is not queued")]
    NotFound {
        /// Task id.
        id: TaskId,
    },

    /// The queue has been shut down and accepts no more work.
    #[error("queue is shut down")]
    Closed,

    /// Storage layer failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::NonUniqueTask { .. } => "queue_non_unique_task",
            QueueError::UnknownCriteria { .. } => "queue_unknown_criteria",
            QueueError::InvalidState { .. } => "queue_invalid_state",
            QueueError::ScheduleExhausted { .. } => "queue_schedule_exhausted",
            QueueError::NotFound { .. } => "queue_not_found",
            QueueError::Closed => "queue_closed",
            QueueError::Storage(e) => e.as_label(),
        }
    }
}

impl From<StorageError> for QueueError {
    /// Unknown criteria is a caller error whatever layer detects it.
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::UnknownCriteria { field } => QueueError::UnknownCriteria { field },
            other => QueueError::Storage(other),
        }
    }
}

/// # Errors produced by storage implementations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StorageError {
    /// A task with this id is already held in one of the sets.
    #[error("task {id} is already stored")]
    DuplicateTask {
        /// Task id.
        id: TaskId,
    },

    /// A criteria key does not name a searchable task field.
    #[error("unknown criteria field {field:?}")]
    UnknownCriteria {
        /// The offending field name.
        field: String,
    },

    /// A persisted snapshot could not be decoded or resolved.
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Document store failure.
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
    },
}

impl StorageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StorageError::DuplicateTask { .. } => "storage_duplicate_task",
            StorageError::UnknownCriteria { .. } => "storage_unknown_criteria",
            StorageError::Snapshot(_) => "storage_snapshot",
            StorageError::Backend { .. } => "storage_backend",
        }
    }

    /// Convenience constructor for backend failures.
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }
}

/// # Errors raised while rebuilding a task from its snapshot.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No callable is registered under the stored symbol.
    #[error("no callable registered for symbol {symbol:?}")]
    UnknownCallable {
        /// Stored symbol.
        symbol: String,
    },

    /// The method resolver does not know the stored owner reference.
    #[error("callable {symbol:?} cannot be bound to owner {owner:?}")]
    UnresolvedOwner {
        /// Stored symbol.
        symbol: String,
        /// Stored owner reference.
        owner: String,
    },

    /// The document does not have the snapshot shape.
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// # Errors produced by task execution.
///
/// Returned by callables (`Fail`, `Canceled`) or synthesized by the runner
/// (`Timeout`, `Panicked`, `Interrupted`, `Storage`). Each maps onto a terminal task state.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task execution exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The callable returned an error.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The callable panicked.
    #[error("execution panicked: {info}")]
    Panicked {
        /// Panic payload, when it was a string.
        info: String,
    },

    /// Task was cancelled (explicit cancel or queue shutdown).
    #[error("context cancelled")]
    Canceled,

    /// Task was found running after a restart with no worker owning it.
    #[error("interrupted by restart")]
    Interrupted,

    /// Storage refused to record the task as running; the callable never ran.
    #[error("not recorded as running: {error}")]
    Storage {
        /// The underlying storage error message.
        error: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskqueue::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
            TaskError::Interrupted => "interrupted_by_restart",
            TaskError::Storage { .. } => "task_storage_failed",
        }
    }

    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }
}

/// Failure detail attached to a task that ended in `error`, `timed_out` or `canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable cause code (see [`TaskError::as_label`]).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl From<&TaskError> for ErrorInfo {
    fn from(e: &TaskError) -> Self {
        Self {
            code: e.as_label().to_string(),
            message: e.to_string(),
        }
    }
}

/// # Errors produced by the dispatch runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some workers remained stuck and were abandoned.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of tasks still running when the grace period ended.
        stuck: Vec<String>,
    },

    /// OS signal handlers could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_criteria_is_lifted_out_of_storage() {
        let err: QueueError = StorageError::UnknownCriteria {
            field: "foo".into(),
        }
        .into();
        assert!(matches!(err, QueueError::UnknownCriteria { ref field } if field == "foo"));
        assert_eq!(err.as_label(), "queue_unknown_criteria");

        let err: QueueError = StorageError::backend("down").into();
        assert_eq!(err.as_label(), "storage_backend");
    }

    #[test]
    fn error_info_carries_label_and_message() {
        let info = ErrorInfo::from(&TaskError::fail("boom"));
        assert_eq!(info.code, "task_failed");
        assert_eq!(info.message, "execution failed: boom");
        assert_eq!(ErrorInfo::from(&TaskError::Interrupted).code, "interrupted_by_restart");
    }
}
