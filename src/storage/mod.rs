//! # Task storage.
//!
//! A [`Storage`] holds every task of a queue in exactly one of three sets:
//!
//! ```text
//!            enqueue_waiting                store_running                store_complete
//! caller ───────────────────► waiting ─────────────────────► running ─────────────────────► complete
//!                      (ordered by scheduled_time,   (keyed by id)    │          (keyed by id,
//!                       FIFO on ties)                                 │           history)
//!                                ▲                                    │
//!                                └──────────── re-arm ────────────────┘
//! ```
//!
//! Implementations:
//! - [`VolatileStorage`]: process memory only;
//! - [`PersistentStorage`]: the same in-memory index, mirrored into a
//!   [`DocumentStore`] as task snapshots so waiting/running tasks survive a restart.
//!
//! ## Rules
//! - Each set is guarded independently; two concurrent dequeues never observe
//!   the same minimum, and a dequeue racing a removal of the same task resolves
//!   to exactly one winner.
//! - `dequeue_waiting` ignores eligibility; callers compare the scheduled time
//!   with the clock themselves, or use `dequeue_ready`.
//! - `remove_complete` is a no-op: completion records are retained history.

mod document;
mod persistent;
mod volatile;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::tasks::Task;

pub use document::{Document, DocumentStore, MemoryDocumentStore, Query};
pub use persistent::{PersistentStorage, QUEUE_SET, RecoveryReport};
pub use volatile::VolatileStorage;

/// Field-name → expected-value mapping; all entries must match (logical AND).
pub type Criteria = Map<String, Value>;

/// Storage contract shared by the volatile and persistent variants.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Inserts into the waiting set.
    ///
    /// # Errors
    /// [`StorageError::DuplicateTask`] if the id is already held in any set.
    async fn enqueue_waiting(&self, task: Task) -> Result<(), StorageError>;

    /// Removes and returns the waiting task with the smallest scheduled time
    /// (unscheduled tasks first, FIFO on ties), eligible or not.
    async fn dequeue_waiting(&self) -> Result<Option<Task>, StorageError>;

    /// Like [`Storage::dequeue_waiting`], but only if that task is eligible at `now`.
    async fn dequeue_ready(&self, now: DateTime<Utc>) -> Result<Option<Task>, StorageError>;

    /// Returns the next waiting task without removing it.
    async fn peek_waiting(&self) -> Option<Task>;

    /// Number of waiting tasks.
    async fn num_waiting(&self) -> usize;

    /// Removes `task` from the waiting set. Returns `false` if it was not there.
    async fn remove_waiting(&self, task: &Task) -> Result<bool, StorageError>;

    /// Moves a waiting `task` to the position its current scheduled time gives
    /// it. Returns `false` if it was not waiting.
    async fn requeue_waiting(&self, task: &Task) -> Result<bool, StorageError> {
        if !self.remove_waiting(task).await? {
            return Ok(false);
        }
        self.enqueue_waiting(task.clone()).await?;
        Ok(true)
    }

    /// Inserts into the running set. On error the task is not stored.
    async fn store_running(&self, task: Task) -> Result<(), StorageError>;

    /// Removes `task` from the running set. Returns `false` if it was not there.
    async fn remove_running(&self, task: &Task) -> Result<bool, StorageError>;

    /// Records a completed task. Storing the same task twice keeps one record.
    async fn store_complete(&self, task: Task) -> Result<(), StorageError>;

    /// No-op: completion history is retained. Always returns `false`.
    async fn remove_complete(&self, task: &Task) -> Result<bool, StorageError>;

    /// Waiting tasks, in dispatch order.
    async fn waiting(&self) -> Vec<Task>;

    /// Running tasks.
    async fn running(&self) -> Vec<Task>;

    /// Completed tasks.
    async fn complete(&self) -> Vec<Task>;

    /// Every stored task: waiting, then running, then complete.
    async fn all_tasks(&self) -> Vec<Task> {
        let mut all = self.waiting().await;
        all.extend(self.running().await);
        all.extend(self.complete().await);
        all
    }

    /// Tasks in any set matching every entry of `criteria`.
    ///
    /// # Errors
    /// [`StorageError::UnknownCriteria`] if a key is not a searchable field,
    /// even when no task is stored.
    async fn find(&self, criteria: &Criteria) -> Result<Vec<Task>, StorageError> {
        validate_criteria(criteria.keys().map(String::as_str))?;
        Ok(self
            .all_tasks()
            .await
            .into_iter()
            .filter(|t| matches_criteria(t, criteria))
            .collect())
    }
}

/// Checks that every name is a searchable task field.
pub fn validate_criteria<'a>(
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), StorageError> {
    for field in fields {
        if !Task::SEARCHABLE_FIELDS.contains(&field) {
            return Err(StorageError::UnknownCriteria {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

/// Equality match on every entry; unknown fields never match.
pub(crate) fn matches_criteria(task: &Task, criteria: &Criteria) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| task.field(field).as_ref() == Some(expected))
}
