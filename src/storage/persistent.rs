//! # Persistent storage.
//!
//! [`PersistentStorage`] keeps the same in-memory index as [`VolatileStorage`]
//! and mirrors every set change into a [`DocumentStore`]: one document per
//! task, holding its [`TaskSnapshot`] plus a `queue_set` field naming the set
//! (`waiting`, `running` or `complete`).
//!
//! ## Recovery
//! [`PersistentStorage::open`] reloads every document:
//! - `waiting` → back in the waiting set, keeping its scheduled time;
//! - `running` → no worker owns it anymore: marked `error`
//!   (`interrupted_by_restart`) and moved to `complete`;
//! - `complete` → loaded as history.
//!
//! Documents that cannot be decoded or whose callable is not registered are
//! skipped, logged, and listed in the [`RecoveryReport`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{StorageError, TaskError};
use crate::storage::document::{Document, DocumentStore, Query};
use crate::storage::volatile::VolatileStorage;
use crate::storage::Storage;
use crate::tasks::{CallableRegistry, Task, TaskSnapshot};

/// Document key naming the set a persisted task belongs to
/// (`"waiting"`, `"running"` or `"complete"`).
pub const QUEUE_SET: &str = "queue_set";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueSet {
    Waiting,
    Running,
    Complete,
}

impl QueueSet {
    fn as_str(self) -> &'static str {
        match self {
            QueueSet::Waiting => "waiting",
            QueueSet::Running => "running",
            QueueSet::Complete => "complete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueSet::Waiting),
            "running" => Some(QueueSet::Running),
            "complete" => Some(QueueSet::Complete),
            _ => None,
        }
    }
}

/// Outcome of reloading a document store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks put back in the waiting set.
    pub waiting: usize,
    /// Tasks found running and marked `interrupted_by_restart`.
    pub interrupted: usize,
    /// Completion records loaded.
    pub complete: usize,
    /// Documents that could not be restored: `(id or "?", reason)`.
    pub skipped: Vec<(String, String)>,
}

/// Storage mirrored into a [`DocumentStore`].
pub struct PersistentStorage {
    index: VolatileStorage,
    store: Arc<dyn DocumentStore>,
}

impl PersistentStorage {
    /// Opens storage over `store`, recovering whatever it already holds.
    ///
    /// # Errors
    /// Fails only if the document store itself fails.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        registry: &CallableRegistry,
    ) -> Result<(Self, RecoveryReport), StorageError> {
        let this = Self {
            index: VolatileStorage::new(),
            store,
        };
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for doc in this.store.find(&Query::new()).await? {
            let id = doc
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();
            let set = doc
                .get(QUEUE_SET)
                .and_then(Value::as_str)
                .and_then(QueueSet::parse);
            let restored = TaskSnapshot::from_document(doc)
                .and_then(|snap| snap.to_task(registry))
                .map_err(StorageError::from);

            let (task, set) = match (restored, set) {
                (Ok(task), Some(set)) => (task, set),
                (Err(e), _) => {
                    tracing::warn!(task = %id, error = %e, "skipping unrestorable task");
                    report.skipped.push((id, e.to_string()));
                    continue;
                }
                (Ok(_), None) => {
                    tracing::warn!(task = %id, "skipping task without a queue set");
                    report.skipped.push((id, format!("missing {QUEUE_SET}")));
                    continue;
                }
            };

            match set {
                QueueSet::Waiting => {
                    this.index.insert_waiting(task)?;
                    report.waiting += 1;
                }
                QueueSet::Running => {
                    task.abandon(now, &TaskError::Interrupted);
                    tracing::info!(task = %task.id(), "marking task interrupted by restart");
                    this.index.insert_complete(task.clone());
                    this.write(&task, QueueSet::Complete).await?;
                    report.interrupted += 1;
                }
                QueueSet::Complete => {
                    this.index.insert_complete(task);
                    report.complete += 1;
                }
            }
        }

        tracing::debug!(
            waiting = report.waiting,
            interrupted = report.interrupted,
            complete = report.complete,
            skipped = report.skipped.len(),
            "persistent storage opened"
        );
        Ok((this, report))
    }

    /// Underlying document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Number of running tasks.
    pub fn num_running(&self) -> usize {
        self.index.num_running()
    }

    /// Number of completed tasks.
    pub fn num_complete(&self) -> usize {
        self.index.num_complete()
    }

    fn id_query(task: &Task) -> Query {
        let mut q = Query::new();
        q.insert("id".into(), Value::String(task.id().to_string()));
        q
    }

    /// Replaces the task's document with a fresh snapshot tagged with `set`.
    async fn write(&self, task: &Task, set: QueueSet) -> Result<(), StorageError> {
        let mut doc: Document = task.snapshot().to_document()?;
        doc.insert(QUEUE_SET.into(), Value::String(set.as_str().into()));
        self.store.replace(&Self::id_query(task), doc).await
    }

    async fn erase(&self, task: &Task) -> Result<(), StorageError> {
        self.store.remove(&Self::id_query(task)).await.map(drop)
    }
}

#[async_trait]
impl Storage for PersistentStorage {
    async fn enqueue_waiting(&self, task: Task) -> Result<(), StorageError> {
        self.index.insert_waiting(task.clone())?;
        if let Err(e) = self.write(&task, QueueSet::Waiting).await {
            self.index.take_waiting(&task.id());
            return Err(e);
        }
        Ok(())
    }

    async fn dequeue_waiting(&self) -> Result<Option<Task>, StorageError> {
        let Some(task) = self.index.pop_waiting() else {
            return Ok(None);
        };
        self.erase(&task).await?;
        Ok(Some(task))
    }

    async fn dequeue_ready(&self, now: DateTime<Utc>) -> Result<Option<Task>, StorageError> {
        // The document is rewritten by the following `store_running`.
        Ok(self.index.pop_ready(now))
    }

    async fn peek_waiting(&self) -> Option<Task> {
        self.index.first_waiting()
    }

    async fn num_waiting(&self) -> usize {
        self.index.num_waiting().await
    }

    async fn remove_waiting(&self, task: &Task) -> Result<bool, StorageError> {
        if self.index.take_waiting(&task.id()).is_none() {
            return Ok(false);
        }
        self.erase(task).await?;
        Ok(true)
    }

    async fn store_running(&self, task: Task) -> Result<(), StorageError> {
        self.index.insert_running(task.clone())?;
        if let Err(e) = self.write(&task, QueueSet::Running).await {
            self.index.take_running(&task.id());
            return Err(e);
        }
        Ok(())
    }

    async fn remove_running(&self, task: &Task) -> Result<bool, StorageError> {
        // The document keeps saying `running` until the following
        // `enqueue_waiting` or `store_complete` replaces it; if the process
        // dies first, recovery reports the task as interrupted.
        Ok(self.index.take_running(&task.id()).is_some())
    }

    async fn requeue_waiting(&self, task: &Task) -> Result<bool, StorageError> {
        // Repositions the index entry, then replaces the document in one write.
        if self.index.take_waiting(&task.id()).is_none() {
            return Ok(false);
        }
        self.index.insert_waiting(task.clone())?;
        self.write(task, QueueSet::Waiting).await?;
        Ok(true)
    }

    /// The in-memory record is kept even if the document write fails.
    async fn store_complete(&self, task: Task) -> Result<(), StorageError> {
        self.index.insert_complete(task.clone());
        self.write(&task, QueueSet::Complete).await
    }

    async fn remove_complete(&self, _task: &Task) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn waiting(&self) -> Vec<Task> {
        self.index.waiting().await
    }

    async fn running(&self) -> Vec<Task> {
        self.index.running().await
    }

    async fn complete(&self) -> Vec<Task> {
        self.index.complete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::storage::MemoryDocumentStore;
    use crate::tasks::{CallableFn, CallableRef, Invocation, TaskState};

    fn noop() -> CallableRef {
        CallableFn::arc("noop", |_inv: Invocation| async { Ok::<_, TaskError>(Value::Null) })
    }

    fn registry() -> CallableRegistry {
        let mut reg = CallableRegistry::new();
        reg.register(noop());
        reg
    }

    async fn open(store: &Arc<MemoryDocumentStore>) -> (PersistentStorage, RecoveryReport) {
        let store: Arc<dyn DocumentStore> = store.clone();
        PersistentStorage::open(store, &registry())
            .await
            .expect("open")
    }

    #[tokio::test]
    async fn running_insert_and_remove_track_counts() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;
        let task = Task::new(noop());

        storage.store_running(task.clone()).await.expect("store");
        assert_eq!(storage.num_running(), 1);
        assert_eq!(docs.len(), 1);

        assert!(storage.remove_running(&task).await.expect("remove"));
        assert_eq!(storage.num_running(), 0);
        // Rewritten, not erased, by the next set.
        assert_eq!(docs.len(), 1);
        storage.store_complete(task.clone()).await.expect("complete");
        let doc = docs.find(&Query::new()).await.expect("find").remove(0);
        assert_eq!(doc[QUEUE_SET], Value::from("complete"));
    }

    #[tokio::test]
    async fn remove_complete_is_a_no_op() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;
        let task = Task::new(noop());

        storage.store_complete(task.clone()).await.expect("store");
        storage.store_complete(task.clone()).await.expect("store");
        assert_eq!(storage.num_complete(), 1);
        assert_eq!(docs.len(), 1);
        assert!(!storage.remove_complete(&task).await.expect("remove"));
        assert_eq!(storage.num_complete(), 1);
    }

    #[tokio::test]
    async fn requeue_rewrites_the_document_in_place() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;
        let later = Task::builder(noop())
            .scheduler(crate::scheduling::Scheduler::at(Utc::now() + chrono::TimeDelta::hours(1)))
            .build();
        assert!(later.schedule());
        storage.enqueue_waiting(later.clone()).await.expect("enqueue");
        assert!(storage.dequeue_ready(Utc::now()).await.expect("ready").is_none());

        later.demote();
        assert!(storage.requeue_waiting(&later).await.expect("requeue"));
        assert_eq!(docs.len(), 1);
        let doc = docs.find(&Query::new()).await.expect("find").remove(0);
        assert_eq!(doc[QUEUE_SET], Value::from("waiting"));
        assert_eq!(doc["serialized"]["scheduler"]["type"], Value::from("immediate"));

        let got = storage.dequeue_ready(Utc::now()).await.expect("ready");
        assert!(got.is_some_and(|t| t.ptr_eq(&later)));

        let stranger = Task::new(noop());
        assert!(!storage.requeue_waiting(&stranger).await.expect("requeue"));
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn moving_between_sets_keeps_one_document() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;
        let task = Task::new(noop());

        storage.enqueue_waiting(task.clone()).await.expect("enqueue");
        let got = storage.dequeue_ready(Utc::now()).await.expect("dequeue");
        assert!(got.is_some());
        storage.store_running(task.clone()).await.expect("running");
        assert_eq!(docs.len(), 1);
        let doc = docs.find(&Query::new()).await.expect("find").remove(0);
        assert_eq!(doc[QUEUE_SET], Value::from("running"));
    }

    #[tokio::test]
    async fn reopening_recovers_waiting_and_interrupts_running() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;

        let waiting = Task::new(noop());
        storage.enqueue_waiting(waiting.clone()).await.expect("enqueue");

        let running = Task::new(noop());
        running.start(Utc::now());
        storage.store_running(running.clone()).await.expect("running");

        let done = Task::new(noop());
        done.run().await;
        storage.store_complete(done.clone()).await.expect("complete");
        drop(storage);

        let (reopened, report) = open(&docs).await;
        assert_eq!(report.waiting, 1);
        assert_eq!(report.interrupted, 1);
        assert_eq!(report.complete, 1);
        assert!(report.skipped.is_empty());

        assert_eq!(reopened.num_waiting().await, 1);
        assert_eq!(reopened.num_running(), 0);
        assert_eq!(reopened.num_complete(), 2);

        let recovered = reopened
            .complete()
            .await
            .into_iter()
            .find(|t| t.id() == running.id())
            .expect("interrupted task kept");
        assert_eq!(recovered.state(), TaskState::Error);
        assert_eq!(
            recovered.error_info().map(|i| i.code),
            Some("interrupted_by_restart".to_string())
        );
    }

    #[tokio::test]
    async fn unregistered_callables_are_skipped() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let (storage, _) = open(&docs).await;
        let stray = Task::new(CallableFn::arc("stray", |_inv: Invocation| async {
            Ok::<_, TaskError>(Value::Null)
        }));
        storage.enqueue_waiting(stray).await.expect("enqueue");
        drop(storage);

        let (reopened, report) = open(&docs).await;
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(reopened.num_waiting().await, 0);
    }
}
