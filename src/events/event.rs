//! # Runtime events emitted by the task queue.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Task lifecycle**: enqueue, start, outcome, re-arm, demotion
//! - **Shutdown**: request, clean stop, grace overrun
//! - **Subscriber health**: overflow and panics inside subscriber workers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task id,
//! callable name, reasons and scheduled times.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskqueue::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("5f0c…")
//!     .with_name("repo.sync")
//!     .with_reason("boom")
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.name.as_deref(), Some("repo.sync"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! assert_eq!(ev.timeout_ms, Some(5_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::tasks::Task;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `name`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `name`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (explicit call or OS signal).
    ShutdownRequested,

    /// All workers stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some workers did not stop in time.
    ///
    /// Sets:
    /// - `reason`: comma-separated ids of the stuck tasks
    GraceExceeded,

    // === Task lifecycle events ===
    /// Task accepted into the waiting set.
    ///
    /// Sets:
    /// - `task`, `name`
    /// - `scheduled_at`: first eligible time (`None` = immediately)
    TaskEnqueued,

    /// Task handed to a worker.
    ///
    /// Sets:
    /// - `task`, `name`
    /// - `runs`: firings completed before this one
    /// - `timeout_ms`: execution bound, if any
    TaskStarting,

    /// Callable returned normally.
    ///
    /// Sets:
    /// - `task`, `name`, `runs`
    TaskFinished,

    /// Callable returned an error or panicked, or the task was interrupted by a restart.
    ///
    /// Sets:
    /// - `task`, `name`, `runs`
    /// - `reason`: failure message
    TaskFailed,

    /// Execution exceeded its timeout.
    ///
    /// Sets:
    /// - `task`, `name`
    /// - `timeout_ms`: the bound that was exceeded
    TimeoutHit,

    /// Task canceled while waiting or running.
    ///
    /// Sets:
    /// - `task`, `name`
    /// - `reason`: `"canceled_waiting"`, `"canceled_running"`, `"queue_shutdown"`
    ///   or `"callable_canceled"` (the callable itself returned `Canceled`)
    TaskCanceled,

    /// Repeating task re-armed into the waiting set.
    ///
    /// Sets:
    /// - `task`, `name`, `runs`
    /// - `scheduled_at`: next eligible time
    TaskRescheduled,

    /// Task scheduler demoted to `Immediate` by `remove`.
    ///
    /// Sets:
    /// - `task`, `name`
    /// - `reason`: label of the previous scheduler
    TaskDemoted,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task id, if applicable.
    pub task: Option<Arc<str>>,
    /// Callable (or subscriber) name.
    pub name: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Execution timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Eligible time attached to enqueue/reschedule events.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Completed firings of the task.
    pub runs: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            name: None,
            reason: None,
            timeout_ms: None,
            scheduled_at: None,
            runs: None,
        }
    }

    /// Creates an event describing `task`: id, callable name and completed firings.
    pub fn for_task(kind: EventKind, task: &Task) -> Self {
        Event::new(kind)
            .with_task(task.id().to_string())
            .with_name(task.binding().to_string())
            .with_runs(task.runs())
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a callable or subscriber name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches an eligible time.
    #[inline]
    pub fn with_scheduled_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Attaches a firing count.
    #[inline]
    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_name(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_name(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::ShutdownRequested);
        let b = Event::new(EventKind::ShutdownRequested);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn timeout_is_clamped_to_u32_millis() {
        let ev = Event::new(EventKind::TimeoutHit).with_timeout(Duration::MAX);
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
