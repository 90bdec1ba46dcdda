//! In-memory storage.
//!
//! Waiting tasks live in a `BTreeMap` keyed by `(scheduled_time, seq)`:
//! `None` (run immediately) sorts before any time, and the monotonically
//! increasing `seq` keeps insertion order among equal times. A side index maps
//! task ids to their key so removal by id does not scan.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::storage::Storage;
use crate::tasks::{Task, TaskId};

type WaitKey = (Option<DateTime<Utc>>, u64);

#[derive(Default)]
struct WaitingSet {
    order: BTreeMap<WaitKey, Task>,
    index: HashMap<TaskId, WaitKey>,
}

impl WaitingSet {
    fn insert(&mut self, key: WaitKey, task: Task) {
        self.index.insert(task.id(), key);
        self.order.insert(key, task);
    }

    fn pop_first(&mut self) -> Option<Task> {
        let (_, task) = self.order.pop_first()?;
        self.index.remove(&task.id());
        Some(task)
    }

    fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let key = self.index.remove(id)?;
        self.order.remove(&key)
    }
}

#[derive(Default)]
struct CompleteSet {
    by_id: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

/// Storage held entirely in process memory.
///
/// Each set has its own lock. When more than one is needed, they are taken in
/// the order waiting → running → complete.
#[derive(Default)]
pub struct VolatileStorage {
    seq: AtomicU64,
    waiting: Mutex<WaitingSet>,
    running: Mutex<HashMap<TaskId, Task>>,
    complete: Mutex<CompleteSet>,
}

impl VolatileStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of running tasks.
    pub fn num_running(&self) -> usize {
        self.running.lock().len()
    }

    /// Number of completed tasks.
    pub fn num_complete(&self) -> usize {
        self.complete.lock().by_id.len()
    }

    pub(crate) fn insert_waiting(&self, task: Task) -> Result<(), StorageError> {
        let id = task.id();
        let mut waiting = self.waiting.lock();
        if waiting.index.contains_key(&id)
            || self.running.lock().contains_key(&id)
            || self.complete.lock().by_id.contains_key(&id)
        {
            return Err(StorageError::DuplicateTask { id });
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        waiting.insert((task.scheduled_time(), seq), task);
        Ok(())
    }

    pub(crate) fn pop_waiting(&self) -> Option<Task> {
        self.waiting.lock().pop_first()
    }

    pub(crate) fn pop_ready(&self, now: DateTime<Utc>) -> Option<Task> {
        let mut waiting = self.waiting.lock();
        let (&(at, _), _) = waiting.order.first_key_value()?;
        if at.is_some_and(|at| at > now) {
            return None;
        }
        waiting.pop_first()
    }

    pub(crate) fn first_waiting(&self) -> Option<Task> {
        self.waiting
            .lock()
            .order
            .first_key_value()
            .map(|(_, t)| t.clone())
    }

    pub(crate) fn take_waiting(&self, id: &TaskId) -> Option<Task> {
        self.waiting.lock().remove(id)
    }

    pub(crate) fn insert_running(&self, task: Task) -> Result<(), StorageError> {
        let id = task.id();
        let mut running = self.running.lock();
        if running.contains_key(&id) {
            return Err(StorageError::DuplicateTask { id });
        }
        running.insert(id, task);
        Ok(())
    }

    pub(crate) fn take_running(&self, id: &TaskId) -> Option<Task> {
        self.running.lock().remove(id)
    }

    pub(crate) fn insert_complete(&self, task: Task) {
        let mut complete = self.complete.lock();
        let id = task.id();
        if complete.by_id.insert(id, task).is_none() {
            complete.order.push(id);
        }
    }
}

#[async_trait]
impl Storage for VolatileStorage {
    async fn enqueue_waiting(&self, task: Task) -> Result<(), StorageError> {
        self.insert_waiting(task)
    }

    async fn dequeue_waiting(&self) -> Result<Option<Task>, StorageError> {
        Ok(self.pop_waiting())
    }

    async fn dequeue_ready(&self, now: DateTime<Utc>) -> Result<Option<Task>, StorageError> {
        Ok(self.pop_ready(now))
    }

    async fn peek_waiting(&self) -> Option<Task> {
        self.first_waiting()
    }

    async fn num_waiting(&self) -> usize {
        self.waiting.lock().order.len()
    }

    async fn remove_waiting(&self, task: &Task) -> Result<bool, StorageError> {
        Ok(self.take_waiting(&task.id()).is_some())
    }

    async fn store_running(&self, task: Task) -> Result<(), StorageError> {
        self.insert_running(task)
    }

    async fn remove_running(&self, task: &Task) -> Result<bool, StorageError> {
        Ok(self.take_running(&task.id()).is_some())
    }

    async fn store_complete(&self, task: Task) -> Result<(), StorageError> {
        self.insert_complete(task);
        Ok(())
    }

    async fn remove_complete(&self, _task: &Task) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn waiting(&self) -> Vec<Task> {
        self.waiting.lock().order.values().cloned().collect()
    }

    async fn running(&self) -> Vec<Task> {
        self.running.lock().values().cloned().collect()
    }

    async fn complete(&self) -> Vec<Task> {
        let complete = self.complete.lock();
        complete
            .order
            .iter()
            .filter_map(|id| complete.by_id.get(id).cloned())
            .collect()
    }
}
