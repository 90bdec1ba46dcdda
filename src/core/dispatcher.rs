//! # Dispatch loop and workers.
//!
//! One [`Dispatcher`] per queue pops due tasks from the waiting set and hands
//! each to a worker in a `JoinSet`. Workers run the callable via
//! [`run_once`](super::runner::run_once), classify the outcome, then either
//! re-arm the task into the waiting set or record it as complete.
//!
//! ```text
//! loop {
//!   ├─► acquire concurrency permit (if limited)
//!   ├─► [ops lock] dequeue_ready(now) ─► start ─► store_running ─► spawn worker
//!   └─► nothing due: sleep until the head's scheduled time
//!                    or a wake-up (enqueue / re-arm / remove)
//! }
//!
//! worker:
//!   run_once ─► [ops lock] finish ─► publish outcome ─► remove_running
//!                          ─► rearm? enqueue_waiting : store_complete
//! ```
//!
//! ## Rules
//! - The loop never awaits a callable; it only waits on time, wake-ups or a permit.
//! - Every move between storage sets, and the state change that goes with it,
//!   happens under the queue's `ops` lock, so queue operations never observe a
//!   task in zero or two sets, or a state that disagrees with its set.
//! - A task the storage refuses to record as running is never executed; it
//!   ends in `error` (`task_storage_failed`) and is recorded as complete.
//! - On runtime cancellation the loop stops dispatching and waits for its workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::runner::run_once;
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::storage::Storage;
use crate::tasks::{Task, TaskState};

/// State shared by the queue handle, the dispatch loop and its workers.
pub(crate) struct Shared {
    pub storage: Arc<dyn Storage>,
    pub bus: Bus,
    /// Wakes the dispatch loop when the waiting set changes.
    pub wake: Notify,
    /// Serializes set transitions.
    pub ops: Mutex<()>,
    /// Cancelled on shutdown; interrupts running callables.
    pub runtime: CancellationToken,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    semaphore: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>, semaphore: Option<Arc<Semaphore>>) -> Self {
        Self { shared, semaphore }
    }

    /// Runs until the runtime token is cancelled, then drains its workers.
    pub(crate) async fn run(self) {
        let mut workers: JoinSet<()> = JoinSet::new();
        let runtime = self.shared.runtime.clone();

        loop {
            if runtime.is_cancelled() {
                break;
            }
            while let Some(joined) = workers.try_join_next() {
                reap(joined);
            }
            let permit = match &self.semaphore {
                Some(sem) => tokio::select! {
                    biased;
                    _ = runtime.cancelled() => break,
                    res = sem.clone().acquire_owned() => match res {
                        Ok(permit) => Some(permit),
                        Err(_closed) => break,
                    },
                },
                None => None,
            };

            if let Some(task) = self.dispatch_next().await {
                self.spawn_worker(&mut workers, task, permit);
                continue;
            }
            drop(permit);

            let delay = self.until_next_due().await;
            let sleep = async {
                match delay {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = runtime.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                _ = sleep => {}
                Some(joined) = workers.join_next(), if !workers.is_empty() => reap(joined),
            }
        }

        while let Some(joined) = workers.join_next().await {
            reap(joined);
        }
    }

    /// Pops the head of the waiting set if it is due, and moves it to running.
    async fn dispatch_next(&self) -> Option<Task> {
        let shared = &self.shared;
        let _ops = shared.ops.lock().await;
        let now = Utc::now();

        let task = match shared.storage.dequeue_ready(now).await {
            Ok(Some(task)) => task,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(error = %e, label = e.as_label(), "dequeue failed");
                return None;
            }
        };

        if !task.start(now) {
            // Not startable anymore; keep it as a completion record.
            record_complete(shared, &task).await;
            return None;
        }
        if let Err(e) = shared.storage.store_running(task.clone()).await {
            // Never run work the storage does not know is running.
            tracing::error!(task = %task.id(), error = %e, label = e.as_label(), "store_running failed");
            let cause = TaskError::Storage {
                error: e.to_string(),
            };
            task.abandon(now, &cause);
            publish_outcome(shared, &task, task.state());
            record_complete(shared, &task).await;
            return None;
        }

        let mut ev = Event::for_task(EventKind::TaskStarting, &task);
        if let Some(timeout) = task.timeout() {
            ev = ev.with_timeout(timeout);
        }
        shared.bus.publish(ev);
        Some(task)
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        task: Task,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let shared = Arc::clone(&self.shared);
        workers.spawn(async move {
            let _permit = permit;
            let outcome = run_once(&task, &shared.runtime).await;
            complete(&shared, task, outcome).await;
        });
    }

    /// Time until the head of the waiting set becomes due; `None` if nothing waits.
    async fn until_next_due(&self) -> Option<Duration> {
        let head = self.shared.storage.peek_waiting().await?;
        let Some(at) = head.scheduled_time() else {
            return Some(Duration::ZERO);
        };
        Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Classifies an execution outcome, then re-arms or records the task.
///
/// Classification and the set move happen under one `ops` lock, so queue
/// operations see the task either running or in its next set, never between.
async fn complete(shared: &Shared, task: Task, outcome: Result<Value, TaskError>) {
    let _ops = shared.ops.lock().await;
    let state = task.finish(outcome, Utc::now());
    publish_outcome(shared, &task, state);

    if let Err(e) = shared.storage.remove_running(&task).await {
        tracing::warn!(task = %task.id(), error = %e, "remove_running failed");
    }

    if task.rearm(Utc::now()) {
        match shared.storage.enqueue_waiting(task.clone()).await {
            Ok(()) => {
                shared.bus.publish(
                    Event::for_task(EventKind::TaskRescheduled, &task)
                        .with_scheduled_at(task.scheduled_time()),
                );
                shared.wake.notify_one();
                return;
            }
            Err(e) => {
                tracing::error!(task = %task.id(), error = %e, "re-arm failed; recording as complete");
            }
        }
    }

    record_complete(shared, &task).await;
}

/// Stores a terminal task. Storage keeps the record in memory even when its
/// backend write fails, so the task never drops out of every set.
async fn record_complete(shared: &Shared, task: &Task) {
    if let Err(e) = shared.storage.store_complete(task.clone()).await {
        tracing::error!(task = %task.id(), error = %e, label = e.as_label(), "store_complete failed");
    }
}

fn publish_outcome(shared: &Shared, task: &Task, state: TaskState) {
    let reason = task.error_info().map(|i| i.message);
    let ev = match state {
        TaskState::Finished => Event::for_task(EventKind::TaskFinished, task),
        TaskState::TimedOut => {
            let mut ev = Event::for_task(EventKind::TimeoutHit, task);
            if let Some(timeout) = task.timeout() {
                ev = ev.with_timeout(timeout);
            }
            ev
        }
        TaskState::Canceled => {
            let why = if task.token().is_cancelled() {
                "canceled_running"
            } else if shared.runtime.is_cancelled() {
                "queue_shutdown"
            } else {
                "callable_canceled"
            };
            Event::for_task(EventKind::TaskCanceled, task).with_reason(why)
        }
        _ => Event::for_task(EventKind::TaskFailed, task).with_reason(reason.unwrap_or_default()),
    };
    shared.bus.publish(ev);
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "worker panicked");
        }
    }
}
