//! # Run a single execution of a task.
//!
//! Executes one firing of a [`Task`]'s callable with its arguments, bounded by
//! the task timeout and interruptible by cancellation.
//!
//! ```text
//! task.token() ──► child token ──► Invocation { args, kwargs, token }
//!                                        │
//!                           callable.call(invocation)
//!                                        │
//!           select! ─┬─ task token cancelled ─────► cancel child → Err(Canceled)
//!                    ├─ runtime token cancelled ──► cancel child → Err(Canceled)
//!                    └─ timeout(callable future) ─┬─ Ok/Err from callable
//!                                                 ├─ panic → Err(Panicked)
//!                                                 └─ elapsed → cancel child → Err(Timeout)
//! ```
//!
//! ## Rules
//! - Derives a **child token** per execution; cancelling it never affects the task token.
//! - Panics (while building or polling the future) become `TaskError::Panicked`.
//! - On cancel or timeout the callable future is dropped: work is preempted at
//!   its `.await` points only.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::{Invocation, Task};

/// Executes `task` once and returns the callable's outcome.
///
/// `runtime` is the owning queue's token; pass a fresh token when running outside a queue.
pub(crate) async fn run_once(task: &Task, runtime: &CancellationToken) -> Result<Value, TaskError> {
    let child = task.token().child_token();
    let invocation = Invocation {
        args: task.args().to_vec(),
        kwargs: task.kwargs().clone(),
        token: child.clone(),
    };

    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| task.callable().call(invocation))) {
        Ok(fut) => fut,
        Err(payload) => {
            return Err(TaskError::Panicked {
                info: panic_message(payload.as_ref()),
            });
        }
    };

    let guarded = async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => Err(TaskError::Panicked {
                info: panic_message(payload.as_ref()),
            }),
        }
    };

    let timeout = task.timeout();
    let bounded = async {
        match timeout {
            Some(dur) => match time::timeout(dur, guarded).await {
                Ok(res) => res,
                Err(_elapsed) => Err(TaskError::Timeout { timeout: dur }),
            },
            None => guarded.await,
        }
    };

    let res = tokio::select! {
        biased;
        _ = task.token().cancelled() => Err(TaskError::Canceled),
        _ = runtime.cancelled() => Err(TaskError::Canceled),
        res = bounded => res,
    };
    if res.is_err() {
        child.cancel();
    }
    res
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
