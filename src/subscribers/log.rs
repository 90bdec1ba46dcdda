//! # LogWriter: renders events through `tracing`.
//!
//! Enabled via the `logging` feature. Output goes wherever the host installed
//! its `tracing` subscriber.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  taskqueue: enqueued task=5f0c… name=repo.sync scheduled_at=None
//! DEBUG taskqueue: starting task=5f0c… name=repo.sync runs=0
//! WARN  taskqueue: failed task=5f0c… name=repo.sync reason="execution failed: boom"
//! WARN  taskqueue: timeout task=5f0c… timeout_ms=2000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let name = e.name.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskEnqueued => {
                tracing::info!(seq = e.seq, task, name, scheduled_at = ?e.scheduled_at, "enqueued");
            }
            EventKind::TaskStarting => {
                tracing::debug!(seq = e.seq, task, name, runs = ?e.runs, timeout_ms = ?e.timeout_ms, "starting");
            }
            EventKind::TaskFinished => {
                tracing::info!(seq = e.seq, task, name, runs = ?e.runs, "finished");
            }
            EventKind::TaskFailed => {
                tracing::warn!(seq = e.seq, task, name, reason, "failed");
            }
            EventKind::TimeoutHit => {
                tracing::warn!(seq = e.seq, task, name, timeout_ms = ?e.timeout_ms, "timeout");
            }
            EventKind::TaskCanceled => {
                tracing::info!(seq = e.seq, task, name, reason, "canceled");
            }
            EventKind::TaskRescheduled => {
                tracing::debug!(seq = e.seq, task, name, runs = ?e.runs, scheduled_at = ?e.scheduled_at, "rescheduled");
            }
            EventKind::TaskDemoted => {
                tracing::info!(seq = e.seq, task, name, previous = reason, "demoted to immediate");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(seq = e.seq, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(seq = e.seq, "all workers stopped within grace");
            }
            EventKind::GraceExceeded => {
                tracing::error!(seq = e.seq, stuck = reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(seq = e.seq, subscriber = name, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(seq = e.seq, subscriber = name, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
