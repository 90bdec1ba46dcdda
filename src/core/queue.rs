//! # TaskQueue: enqueue, lookup, cancellation and graceful shutdown.
//!
//! The [`TaskQueue`] owns a [`Storage`], the event bus with its subscriber
//! fan-out, and the dispatch loop. Callers hand it [`Task`]s and keep their
//! handles to observe state.
//!
//! ## Architecture
//! ```text
//! enqueue(task, unique)
//!   ├─► [ops lock] uniqueness check over waiting + running (fingerprint + scheduler)
//!   ├─► task.schedule(now)  → first eligible time
//!   ├─► storage.enqueue_waiting(task)
//!   └─► publish TaskEnqueued, wake dispatcher
//!
//! Dispatcher (spawned at build) ──► workers ──► storage sets   (see `dispatcher`)
//!
//! Event flow:
//!   queue ops / dispatcher / workers ── publish(Event) ──► Bus ──► listener
//!                                                                   └─► SubscriberSet::emit
//!
//! Shutdown path:
//!   shutdown()
//!     └─► publish ShutdownRequested
//!     └─► runtime_token.cancel()   → running callables end as `canceled`
//!     └─► wait for the dispatcher (and its workers) up to cfg.grace:
//!            ├─ in time → publish AllStoppedWithin
//!            └─ overrun → publish GraceExceeded, abort workers,
//!                         RuntimeError::GraceExceeded { stuck ids }
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use serde_json::{json, Value};
//! use taskqueue::{CallableFn, Invocation, QueueConfig, Task, TaskError, TaskQueue, TaskState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = TaskQueue::builder(QueueConfig::default()).build();
//!
//!     let sum = CallableFn::arc("math.sum", |inv: Invocation| async move {
//!         let total: i64 = inv.args.iter().filter_map(Value::as_i64).sum();
//!         Ok::<_, TaskError>(json!(total))
//!     });
//!     let task = Task::builder(sum).args([json!(1), json!(2)]).build();
//!     queue.enqueue(&task, false).await?;
//!
//!     while !task.state().is_complete() {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!     assert_eq!(task.state(), TaskState::Finished);
//!     assert_eq!(task.result(), Some(json!(3)));
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::builder::QueueBuilder;
use crate::core::config::QueueConfig;
use crate::core::dispatcher::Shared;
use crate::core::shutdown;
use crate::error::{QueueError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::storage::{Criteria, Storage, matches_criteria, validate_criteria};
use crate::tasks::{Task, TaskState};

/// Task queue: storage, dispatch loop and event fan-out.
pub struct TaskQueue {
    cfg: QueueConfig,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_token: CancellationToken,
}

impl TaskQueue {
    /// Starts a builder; see [`QueueBuilder`].
    pub fn builder(cfg: QueueConfig) -> QueueBuilder {
        QueueBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        cfg: QueueConfig,
        shared: Arc<Shared>,
        dispatcher: JoinHandle<()>,
        listener: JoinHandle<()>,
        listener_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
            listener: Mutex::new(Some(listener)),
            listener_token,
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Storage holding this queue's tasks.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }

    /// Event bus; useful for ad-hoc observers and tests.
    pub fn bus(&self) -> &Bus {
        &self.shared.bus
    }

    /// Subscribes to subsequent queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Adds a task to the waiting set.
    ///
    /// With `unique`, the task is rejected if a waiting or running task has the
    /// same fingerprint (callable binding + arguments) and an equal scheduler.
    ///
    /// # Errors
    /// - [`QueueError::NonUniqueTask`] on a uniqueness collision; nothing changes.
    /// - [`QueueError::InvalidState`] unless the task is fresh (`waiting`, never fired).
    /// - [`QueueError::ScheduleExhausted`] if its scheduler offers no first run.
    /// - [`QueueError::Closed`] after shutdown.
    /// - [`QueueError::Storage`] if the task is already stored or storage fails.
    pub async fn enqueue(&self, task: &Task, unique: bool) -> Result<(), QueueError> {
        if self.shared.runtime.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let _ops = self.shared.ops.lock().await;

        let state = task.state();
        if state != TaskState::Waiting || task.runs() > 0 {
            return Err(QueueError::InvalidState { id: task.id(), state });
        }

        if unique {
            let fingerprint = task.fingerprint();
            let scheduler = task.scheduler();
            if let Some(existing) = self
                .active_tasks()
                .await
                .into_iter()
                .find(|t| t.scheduler() == scheduler && t.fingerprint() == fingerprint)
            {
                return Err(QueueError::NonUniqueTask {
                    id: task.id(),
                    existing: existing.id(),
                });
            }
        }

        task.inherit_timeout(self.cfg.default_timeout());
        if !task.schedule_at(Utc::now()) {
            return Err(QueueError::ScheduleExhausted { id: task.id() });
        }
        self.shared.storage.enqueue_waiting(task.clone()).await?;

        self.shared.bus.publish(
            Event::for_task(EventKind::TaskEnqueued, task).with_scheduled_at(task.scheduled_time()),
        );
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Tasks in any set (waiting, running, complete) matching every criterion.
    ///
    /// # Errors
    /// [`QueueError::UnknownCriteria`] if a key is not a searchable field
    /// (see [`Task::SEARCHABLE_FIELDS`]).
    ///
    /// # Example
    /// ```no_run
    /// # async fn demo(queue: &taskqueue::TaskQueue) -> Result<(), taskqueue::QueueError> {
    /// use serde_json::json;
    /// let failed = queue
    ///     .find([("method_name", json!("repo.sync")), ("state", json!("error"))])
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub async fn find<K>(
        &self,
        criteria: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Vec<Task>, QueueError>
    where
        K: Into<String>,
    {
        let criteria: Criteria = criteria.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let _ops = self.shared.ops.lock().await;
        Ok(self.shared.storage.find(&criteria).await?)
    }

    /// True if a waiting or running task equals `candidate` on every named field.
    ///
    /// # Errors
    /// [`QueueError::UnknownCriteria`] if a name is not a searchable field.
    pub async fn exists(&self, candidate: &Task, fields: &[&str]) -> Result<bool, QueueError> {
        validate_criteria(fields.iter().copied())?;
        let criteria: Criteria = fields
            .iter()
            .filter_map(|f| candidate.field(f).map(|v| ((*f).to_string(), v)))
            .collect();

        let _ops = self.shared.ops.lock().await;
        Ok(self
            .active_tasks()
            .await
            .iter()
            .any(|t| matches_criteria(t, &criteria)))
    }

    /// Cancels a waiting or running task.
    ///
    /// A waiting task leaves the waiting set and is recorded as complete without
    /// ever running. A running task has its token cancelled; its worker records
    /// it once the callable yields (see [`Callable`](crate::Callable) on preemption).
    ///
    /// # Errors
    /// - [`QueueError::InvalidState`] if the task already reached a terminal state.
    /// - [`QueueError::NotFound`] if it is not held by this queue.
    pub async fn cancel(&self, task: &Task) -> Result<(), QueueError> {
        let _ops = self.shared.ops.lock().await;
        let now = Utc::now();

        match task.state() {
            TaskState::Waiting => {
                if !self.shared.storage.remove_waiting(task).await? {
                    return Err(QueueError::NotFound { id: task.id() });
                }
                task.cancel(now);
                self.shared.storage.store_complete(task.clone()).await?;
                self.shared.bus.publish(
                    Event::for_task(EventKind::TaskCanceled, task).with_reason("canceled_waiting"),
                );
                self.shared.wake.notify_one();
                Ok(())
            }
            TaskState::Running => {
                if !self.is_running(task).await {
                    return Err(QueueError::NotFound { id: task.id() });
                }
                task.cancel(now);
                Ok(())
            }
            state => Err(QueueError::InvalidState { id: task.id(), state }),
        }
    }

    /// Stops future firings of a task by demoting its scheduler to `Immediate`.
    ///
    /// A waiting task is repositioned to run once, as soon as possible; a running
    /// task completes its current execution and is not re-armed.
    ///
    /// # Errors
    /// [`QueueError::NotFound`] if the task is neither waiting nor running in this queue.
    pub async fn remove(&self, task: &Task) -> Result<(), QueueError> {
        let _ops = self.shared.ops.lock().await;

        let previous = match task.state() {
            TaskState::Waiting => {
                if !self.is_waiting(task).await {
                    return Err(QueueError::NotFound { id: task.id() });
                }
                let previous = task.demote();
                self.shared.storage.requeue_waiting(task).await?;
                self.shared.wake.notify_one();
                previous
            }
            TaskState::Running if self.is_running(task).await => task.demote(),
            _ => return Err(QueueError::NotFound { id: task.id() }),
        };

        self.shared.bus.publish(
            Event::for_task(EventKind::TaskDemoted, task).with_reason(previous.as_label()),
        );
        Ok(())
    }

    /// Cancels running work and waits up to `grace` for workers to stop.
    ///
    /// Idempotent: later calls return `Ok(())` immediately.
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] naming the tasks still running at the deadline;
    /// their workers are aborted.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let Some(mut dispatcher) = self.dispatcher.lock().take() else {
            return Ok(());
        };

        self.shared
            .bus
            .publish(Event::new(EventKind::ShutdownRequested));
        self.shared.runtime.cancel();

        let grace = self.cfg.grace;
        let res = match tokio::time::timeout(grace, &mut dispatcher).await {
            Ok(_) => {
                self.shared
                    .bus
                    .publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                dispatcher.abort();
                let stuck: Vec<String> = self
                    .shared
                    .storage
                    .running()
                    .await
                    .iter()
                    .map(|t| t.id().to_string())
                    .collect();
                self.shared
                    .bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        self.listener_token.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        res
    }

    /// Waits for a termination signal, then shuts down (see [`TaskQueue::shutdown`]).
    ///
    /// # Errors
    /// [`RuntimeError::Signal`] if signal handlers cannot be installed; the
    /// queue keeps running in that case.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await
    }

    async fn active_tasks(&self) -> Vec<Task> {
        let mut tasks = self.shared.storage.waiting().await;
        tasks.extend(self.shared.storage.running().await);
        tasks
    }

    async fn is_waiting(&self, task: &Task) -> bool {
        self.shared
            .storage
            .waiting()
            .await
            .iter()
            .any(|t| t.id() == task.id())
    }

    async fn is_running(&self, task: &Task) -> bool {
        self.shared
            .storage
            .running()
            .await
            .iter()
            .any(|t| t.id() == task.id())
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shared.runtime.cancel();
        self.listener_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    use crate::error::TaskError;
    use crate::scheduling::Scheduler;
    use crate::tasks::{CallableFn, Invocation};

    async fn wait_state(task: &Task, state: TaskState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.state() != state {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("task reached the expected state");
    }

    #[tokio::test]
    async fn worker_completion_is_atomic_for_queue_operations() {
        let queue = TaskQueue::builder(QueueConfig::default()).build();
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        let gated = CallableFn::arc("gated", move |_inv: Invocation| {
            let g = g.clone();
            async move {
                g.notified().await;
                Ok::<_, TaskError>(Value::Null)
            }
        });
        let task = Task::builder(gated)
            .scheduler(Scheduler::interval(
                Duration::from_secs(3600),
                Some(Utc::now()),
                None,
            ))
            .build();
        queue.enqueue(&task, false).await.unwrap();
        wait_state(&task, TaskState::Running).await;

        let ops = queue.shared.ops.lock().await;
        gate.notify_one();
        // The callable returns; its worker now waits for `ops`.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.runs(), 0);
        assert!(queue.is_running(&task).await);
        drop(ops);

        wait_state(&task, TaskState::Waiting).await;
        assert_eq!(task.runs(), 1);
        assert!(task.scheduled_time().is_some());
        assert!(!queue.is_running(&task).await);

        queue.cancel(&task).await.unwrap();
        assert_eq!(task.state(), TaskState::Canceled);
        queue.shutdown().await.unwrap();
    }
}
