//! # taskqueue
//!
//! **taskqueue** schedules, queues, dispatches and durably tracks units of
//! deferred work ("tasks") inside an async Rust process.
//!
//! A task wraps a [`Callable`] with its arguments, a [`Scheduler`] (run now,
//! run once at a time, or run every interval with an optional limit), an
//! optional timeout, and a lifecycle state. A [`TaskQueue`] keeps tasks in a
//! [`Storage`] ordered by eligible time, runs due ones on workers, and re-arms
//! repeating ones.
//!
//! ## Architecture
//! ```text
//!   caller ── Task::builder(callable).args(..).scheduler(..).build()
//!                  │
//!                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TaskQueue                                                        │
//! │  - enqueue / find / exists / cancel / remove                      │
//! │  - Storage: waiting (by scheduled_time, FIFO ties) │ running │    │
//! │             complete                                              │
//! │  - Bus + SubscriberSet (events → subscribers)                     │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//!   Dispatcher loop ── sleeps until the head is due or a wake-up
//!        │
//!        ├──► worker ── run_once(task) ── timeout / cancel guard
//!        ├──► worker          │
//!        └──► ...             ▼
//!                   finished | error | timed_out | canceled
//!                             │
//!               scheduler has a next run? ── yes ─► waiting again
//!                             └──────────── no  ─► complete
//! ```
//!
//! ## Lifecycle
//! ```text
//! waiting ──start──► running ──ok────────► finished
//!    │                  ├────err─────────► error
//!    │                  ├────deadline────► timed_out
//!    └─────cancel───────┴────────────────► canceled
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                              |
//! |-------------------|----------------------------------------------------------|-------------------------------------------------|
//! | **Queue**         | Enqueue with uniqueness, lookup, cancel, remove, shutdown | [`TaskQueue`], [`QueueBuilder`], [`QueueConfig`] |
//! | **Tasks**         | Units of work and their state machine                    | [`Task`], [`TaskBuilder`], [`TaskState`]        |
//! | **Callables**     | Executable logic, persisted by binding                   | [`Callable`], [`CallableFn`], [`CallableRegistry`] |
//! | **Scheduling**    | When a task becomes eligible                             | [`Scheduler`], [`NextRun`]                      |
//! | **Storage**       | Volatile and document-backed persistent sets             | [`Storage`], [`VolatileStorage`], [`PersistentStorage`] |
//! | **Snapshots**     | Serializable projection for durability                   | [`TaskSnapshot`]                                |
//! | **Events**        | Lifecycle observability                                  | [`Event`], [`EventKind`], [`Subscribe`]         |
//! | **Errors**        | Typed errors                                             | [`QueueError`], [`StorageError`], [`TaskError`] |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a subscriber rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::{json, Value};
//! use taskqueue::{CallableFn, Invocation, QueueConfig, Scheduler, Task, TaskError, TaskQueue};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = QueueConfig::default();
//!     cfg.timeout = Duration::from_secs(5);
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn taskqueue::Subscribe>> = vec![Arc::new(taskqueue::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn taskqueue::Subscribe>> = Vec::new();
//!
//!     let queue = TaskQueue::builder(cfg).with_subscribers(subs).build();
//!
//!     let tick = CallableFn::arc("ticker.tick", |inv: Invocation| async move {
//!         if inv.token.is_cancelled() {
//!             return Err(TaskError::Canceled);
//!         }
//!         Ok::<_, TaskError>(Value::Null)
//!     });
//!     let task = Task::builder(tick)
//!         .scheduler(Scheduler::interval(Duration::from_millis(10), None, Some(2)))
//!         .build();
//!     queue.enqueue(&task, true).await?;
//!
//!     while task.runs() < 2 {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!     assert_eq!(queue.find([("runs", json!(2))]).await?.len(), 1);
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod scheduling;
mod storage;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use crate::core::{QueueBuilder, QueueConfig, TaskQueue};
pub use error::{ErrorInfo, QueueError, RuntimeError, SnapshotError, StorageError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use scheduling::{NextRun, Scheduler};
pub use storage::{
    Criteria, Document, DocumentStore, MemoryDocumentStore, PersistentStorage, QUEUE_SET, Query,
    RecoveryReport, Storage, VolatileStorage, validate_criteria,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    Binding, BoxCallFuture, Callable, CallableFn, CallableRef, CallableRegistry, Fingerprint,
    Invocation, SerializedFields, Task, TaskBuilder, TaskId, TaskKind, TaskSnapshot, TaskState,
};

// Optional: a built-in subscriber that logs events through `tracing`.
// Enable with: `--features logging` (on by default).
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
