//! # Task handle and lifecycle state machine.
//!
//! A [`Task`] is a cheap, cloneable handle (`Arc` inside) to one unit of deferred
//! work: a [`CallableRef`] with its arguments, a [`Scheduler`], an optional
//! timeout, and mutable lifecycle status.
//!
//! Callers keep a handle after enqueueing and observe `state()`, `result()` and
//! `error_info()`; every mutation goes through the transitions below, driven by
//! the queue.
//!
//! ## Transitions
//! ```text
//! new ──► Waiting ── start ──► Running ── finish(Ok) ──────► Finished
//!           │                    │     ── finish(Err) ─────► Error
//!           │                    │     ── finish(Timeout) ─► TimedOut
//!           └──── cancel ────────┴──────────────────────────► Canceled
//!
//! Finished | Error | TimedOut ── rearm (scheduler has a next run) ──► Waiting
//! ```
//!
//! ## Rules
//! - `scheduled_time` is `None` while running and in terminal states, unless re-armed.
//! - `runs` counts completed firings; schedulers use it to detect exhaustion.
//! - A canceled task is never re-armed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::runner;
use crate::error::{ErrorInfo, TaskError};
use crate::scheduling::{NextRun, Scheduler};
use crate::tasks::builder::TaskBuilder;
use crate::tasks::callable::{Binding, CallableRef};
use crate::tasks::state::{TaskId, TaskKind, TaskState};

/// Uniqueness key of a task: callable identity plus canonicalized arguments.
///
/// Positional arguments keep their order; keyword arguments are compared as a
/// sorted map, so insertion order never matters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    binding: Binding,
    args: String,
    kwargs: String,
}

/// Mutable part of a task, guarded by one lock.
#[derive(Clone, Debug)]
pub(crate) struct Status {
    pub state: TaskState,
    pub scheduler: Scheduler,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub last_scheduled_time: Option<DateTime<Utc>>,
    pub runs: u32,
    pub timeout: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_info: Option<ErrorInfo>,
}

struct Inner {
    id: TaskId,
    kind: TaskKind,
    callable: CallableRef,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    token: CancellationToken,
    status: RwLock<Status>,
}

/// Handle to a unit of deferred work.
///
/// Clones share the same underlying task; use [`Task::ptr_eq`] to test identity.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl Task {
    /// Field names accepted by `find`/`exists` criteria.
    pub const SEARCHABLE_FIELDS: &'static [&'static str] = &[
        "id",
        "state",
        "kind",
        "method_name",
        "owner",
        "args",
        "kwargs",
        "scheduler",
        "scheduled_time",
        "timeout",
        "runs",
    ];

    /// Creates a generic task running `callable` immediately, without arguments.
    pub fn new(callable: CallableRef) -> Self {
        TaskBuilder::new(callable).build()
    }

    /// Starts a builder for a task running `callable`.
    pub fn builder(callable: CallableRef) -> TaskBuilder {
        TaskBuilder::new(callable)
    }

    pub(crate) fn from_parts(
        id: TaskId,
        kind: TaskKind,
        callable: CallableRef,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        status: Status,
    ) -> Self {
        let token = CancellationToken::new();
        if status.state == TaskState::Canceled {
            token.cancel();
        }
        Self {
            inner: Arc::new(Inner {
                id,
                kind,
                callable,
                args,
                kwargs,
                token,
                status: RwLock::new(status),
            }),
        }
    }

    pub(crate) fn fresh_status(scheduler: Scheduler, timeout: Option<Duration>) -> Status {
        Status {
            state: TaskState::Waiting,
            scheduler,
            scheduled_time: None,
            last_scheduled_time: None,
            runs: 0,
            timeout,
            start_time: None,
            finish_time: None,
            result: None,
            error_info: None,
        }
    }

    // ---- Read accessors ----

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Task kind.
    pub fn kind(&self) -> &TaskKind {
        &self.inner.kind
    }

    /// Wrapped callable.
    pub fn callable(&self) -> &CallableRef {
        &self.inner.callable
    }

    /// Binding of the wrapped callable.
    pub fn binding(&self) -> &Binding {
        self.inner.callable.binding()
    }

    /// Positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// Keyword arguments.
    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.inner.kwargs
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.status.read().state
    }

    /// Current scheduler.
    pub fn scheduler(&self) -> Scheduler {
        self.inner.status.read().scheduler
    }

    /// Eligible time; `None` means "run immediately" or "nothing scheduled".
    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        self.inner.status.read().scheduled_time
    }

    /// Execution bound, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.status.read().timeout
    }

    /// Number of completed firings.
    pub fn runs(&self) -> u32 {
        self.inner.status.read().runs
    }

    /// Start of the latest execution.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.status.read().start_time
    }

    /// End of the latest execution (or cancellation time).
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.inner.status.read().finish_time
    }

    /// Value returned by the latest successful execution.
    pub fn result(&self) -> Option<Value> {
        self.inner.status.read().result.clone()
    }

    /// Failure detail of the latest unsuccessful execution.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.inner.status.read().error_info.clone()
    }

    /// Returns true if both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub(crate) fn status(&self) -> Status {
        self.inner.status.read().clone()
    }

    /// Uniqueness key (callable binding + canonical arguments).
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            binding: self.binding().clone(),
            args: canonical(&self.inner.args),
            kwargs: canonical(&self.inner.kwargs),
        }
    }

    /// Returns the value of a searchable field, or `None` for an unknown field name.
    pub fn field(&self, name: &str) -> Option<Value> {
        let status = self.inner.status.read();
        let value = match name {
            "id" => Value::String(self.inner.id.to_string()),
            "state" => Value::String(status.state.as_str().to_string()),
            "kind" => Value::String(self.inner.kind.name().to_string()),
            "method_name" => Value::String(self.binding().symbol.clone()),
            "owner" => self
                .binding()
                .owner
                .clone()
                .map_or(Value::Null, Value::String),
            "args" => Value::Array(self.inner.args.clone()),
            "kwargs" => Value::Object(self.inner.kwargs.clone().into_iter().collect()),
            "scheduler" => Value::String(status.scheduler.as_label().to_string()),
            "scheduled_time" => status
                .scheduled_time
                .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
            "timeout" => status
                .timeout
                .map_or(Value::Null, |d| Value::from(duration_ms(d))),
            "runs" => Value::from(status.runs),
            _ => return None,
        };
        Some(value)
    }

    // ---- Transitions ----

    /// Computes the first eligible time from the scheduler, using the current clock.
    ///
    /// Returns `false` if the scheduler is already exhausted.
    pub fn schedule(&self) -> bool {
        self.schedule_at(Utc::now())
    }

    pub(crate) fn schedule_at(&self, now: DateTime<Utc>) -> bool {
        let mut status = self.inner.status.write();
        let next = status
            .scheduler
            .next(status.last_scheduled_time, status.runs, now);
        apply_next(&mut status, next)
    }

    /// `Waiting → Running`. Returns `false` (and changes nothing) from any other state.
    pub(crate) fn start(&self, now: DateTime<Utc>) -> bool {
        let mut status = self.inner.status.write();
        if status.state != TaskState::Waiting {
            return false;
        }
        status.state = TaskState::Running;
        status.last_scheduled_time = Some(status.scheduled_time.unwrap_or(now));
        status.scheduled_time = None;
        status.start_time = Some(now);
        status.finish_time = None;
        true
    }

    /// `Running → Finished | Error | TimedOut | Canceled`, classifying the outcome.
    ///
    /// A task cancelled while running stays `Canceled` whatever the outcome.
    pub(crate) fn finish(&self, outcome: Result<Value, TaskError>, now: DateTime<Utc>) -> TaskState {
        let mut status = self.inner.status.write();
        if !matches!(status.state, TaskState::Running | TaskState::Canceled) {
            return status.state;
        }
        status.runs = status.runs.saturating_add(1);
        status.finish_time = Some(now);
        if status.state == TaskState::Canceled {
            return TaskState::Canceled;
        }
        match outcome {
            Ok(value) => {
                status.state = TaskState::Finished;
                status.result = Some(value);
                status.error_info = None;
            }
            Err(e) => {
                status.state = match e {
                    TaskError::Timeout { .. } => TaskState::TimedOut,
                    TaskError::Canceled => TaskState::Canceled,
                    _ => TaskState::Error,
                };
                status.error_info = Some(ErrorInfo::from(&e));
            }
        }
        status.state
    }

    /// Re-arms a completed repeating task. Returns `true` if it is waiting again.
    pub(crate) fn rearm(&self, now: DateTime<Utc>) -> bool {
        let mut status = self.inner.status.write();
        if !matches!(
            status.state,
            TaskState::Finished | TaskState::Error | TaskState::TimedOut
        ) {
            return false;
        }
        let next = status
            .scheduler
            .next(status.last_scheduled_time, status.runs, now);
        if !apply_next(&mut status, next) {
            return false;
        }
        status.state = TaskState::Waiting;
        true
    }

    /// `Waiting | Running → Canceled`; also cancels the execution token.
    ///
    /// Returns the state the task was in, or `None` if it was not cancelable.
    pub(crate) fn cancel(&self, now: DateTime<Utc>) -> Option<TaskState> {
        let prev = {
            let mut status = self.inner.status.write();
            let prev = status.state;
            if !matches!(prev, TaskState::Waiting | TaskState::Running) {
                return None;
            }
            status.state = TaskState::Canceled;
            status.scheduled_time = None;
            status.error_info = Some(ErrorInfo::from(&TaskError::Canceled));
            if prev == TaskState::Waiting {
                status.finish_time = Some(now);
            }
            prev
        };
        self.inner.token.cancel();
        Some(prev)
    }

    /// Swaps the scheduler for [`Scheduler::Immediate`]; a waiting task becomes
    /// eligible right away. Returns the previous scheduler.
    pub(crate) fn demote(&self) -> Scheduler {
        let mut status = self.inner.status.write();
        let prev = status.scheduler;
        status.scheduler = Scheduler::Immediate;
        if status.state == TaskState::Waiting {
            status.scheduled_time = None;
        }
        prev
    }

    /// Applies a queue-wide default timeout to a task that carries none.
    pub(crate) fn inherit_timeout(&self, timeout: Option<Duration>) {
        let mut status = self.inner.status.write();
        if status.timeout.is_none() {
            status.timeout = timeout;
        }
    }

    /// `Running → Error` without an execution: the task was found running with
    /// no worker after a restart, or could not be recorded as running.
    pub(crate) fn abandon(&self, now: DateTime<Utc>, cause: &TaskError) -> bool {
        let mut status = self.inner.status.write();
        if status.state != TaskState::Running {
            return false;
        }
        status.state = TaskState::Error;
        status.scheduled_time = None;
        status.finish_time = Some(now);
        status.error_info = Some(ErrorInfo::from(cause));
        true
    }

    /// Executes a waiting task once, outside any queue, and returns its final state.
    ///
    /// The timeout is honored; the scheduler is not consulted and the task is not re-armed.
    pub async fn run(&self) -> TaskState {
        if !self.start(Utc::now()) {
            return self.state();
        }
        let outcome = runner::run_once(self, &CancellationToken::new()).await;
        self.finish(outcome, Utc::now())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.status.read();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("callable", &self.binding().to_string())
            .field("state", &status.state)
            .field("scheduler", &status.scheduler)
            .field("scheduled_time", &status.scheduled_time)
            .field("runs", &status.runs)
            .finish()
    }
}

fn apply_next(status: &mut Status, next: NextRun) -> bool {
    match next {
        NextRun::Immediately => {
            status.scheduled_time = None;
            true
        }
        NextRun::At(at) => {
            status.scheduled_time = Some(at);
            true
        }
        NextRun::Exhausted => {
            status.scheduled_time = None;
            false
        }
    }
}

fn canonical<T: serde::Serialize>(value: &T) -> String {
    // Maps serialize with sorted keys, so equal arguments give equal strings.
    serde_json::to_string(value).unwrap_or_default()
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{CallableFn, Invocation};
    use chrono::TimeDelta;
    use serde_json::json;

    fn noop() -> CallableRef {
        CallableFn::arc("noop", |_inv: Invocation| async { Ok::<_, TaskError>(Value::Null) })
    }

    fn failing() -> CallableRef {
        CallableFn::arc("error", |_inv: Invocation| async {
            Err::<Value, _>(TaskError::fail("Aaaargh!"))
        })
    }

    #[test]
    fn new_task_is_waiting_and_unscheduled() {
        let task = Task::new(noop());
        assert_eq!(task.state(), TaskState::Waiting);
        assert!(task.schedule());
        assert_eq!(task.scheduled_time(), None);
        assert_eq!(task.runs(), 0);
    }

    #[tokio::test]
    async fn run_noop_finishes() {
        let task = Task::new(noop());
        assert_eq!(task.run().await, TaskState::Finished);
        assert_eq!(task.result(), Some(Value::Null));
        assert_eq!(task.runs(), 1);
        assert!(task.start_time().is_some());
        assert!(task.finish_time().is_some());
    }

    #[tokio::test]
    async fn run_error_records_failure_detail() {
        let task = Task::new(failing());
        assert_eq!(task.run().await, TaskState::Error);
        let info = task.error_info().expect("error info");
        assert_eq!(info.code, "task_failed");
        assert!(info.message.contains("Aaaargh!"));
    }

    #[tokio::test]
    async fn run_returns_result_value() {
        let task = Task::new(CallableFn::arc("result", |_inv: Invocation| async {
            Ok::<_, TaskError>(json!(true))
        }));
        task.run().await;
        assert_eq!(task.result(), Some(json!(true)));
    }

    #[tokio::test]
    async fn running_twice_is_refused() {
        let task = Task::new(noop());
        task.run().await;
        assert_eq!(task.run().await, TaskState::Finished);
        assert_eq!(task.runs(), 1);
    }

    #[test]
    fn cancel_only_from_waiting_or_running() {
        let task = Task::new(noop());
        let now = Utc::now();
        assert_eq!(task.cancel(now), Some(TaskState::Waiting));
        assert_eq!(task.state(), TaskState::Canceled);
        assert!(task.token().is_cancelled());
        assert_eq!(task.cancel(now), None);
        assert!(!task.start(now));
    }

    #[test]
    fn cancel_while_running_wins_over_outcome() {
        let task = Task::new(noop());
        let now = Utc::now();
        assert!(task.start(now));
        task.cancel(now);
        assert_eq!(task.finish(Ok(Value::Null), now), TaskState::Canceled);
        assert!(!task.rearm(now));
    }

    #[test]
    fn timeout_outcome_maps_to_timed_out() {
        let task = Task::new(noop());
        let now = Utc::now();
        task.start(now);
        let state = task.finish(
            Err(TaskError::Timeout {
                timeout: Duration::from_millis(5),
            }),
            now,
        );
        assert_eq!(state, TaskState::TimedOut);
        assert_eq!(task.error_info().map(|i| i.code), Some("task_timeout".into()));
    }

    #[test]
    fn interval_rearms_until_limit() {
        let start = Utc::now() + TimeDelta::seconds(1);
        let task = Task::builder(noop())
            .scheduler(Scheduler::interval(Duration::from_secs(5), Some(start), Some(2)))
            .build();
        assert!(task.schedule_at(Utc::now()));
        assert_eq!(task.scheduled_time(), Some(start));

        assert!(task.start(start));
        assert_eq!(task.scheduled_time(), None);
        task.finish(Ok(Value::Null), start);
        assert!(task.rearm(start));
        assert_eq!(task.state(), TaskState::Waiting);
        assert_eq!(task.scheduled_time(), Some(start + TimeDelta::seconds(5)));

        let second = start + TimeDelta::seconds(5);
        assert!(task.start(second));
        task.finish(Ok(Value::Null), second);
        assert!(!task.rearm(second));
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.scheduled_time(), None);
    }

    #[test]
    fn demote_makes_waiting_task_immediate() {
        let task = Task::builder(noop())
            .scheduler(Scheduler::interval(Duration::from_secs(60), None, None))
            .build();
        task.schedule();
        assert!(task.scheduled_time().is_some());
        assert!(task.demote().is_repeating());
        assert_eq!(task.scheduler(), Scheduler::Immediate);
        assert_eq!(task.scheduled_time(), None);
    }

    #[test]
    fn fingerprint_ignores_kwarg_order_but_not_values() {
        let a = Task::builder(noop())
            .kwarg("foo", json!(1))
            .kwarg("bar", json!(2))
            .build();
        let b = Task::builder(noop())
            .kwarg("bar", json!(2))
            .kwarg("foo", json!(1))
            .build();
        let c = Task::builder(noop())
            .kwarg("foo", json!(2))
            .kwarg("bar", json!(3))
            .build();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fields_are_searchable() {
        let task = Task::builder(noop()).args([json!(1), json!(2)]).build();
        assert_eq!(task.field("state"), Some(json!("waiting")));
        assert_eq!(task.field("method_name"), Some(json!("noop")));
        assert_eq!(task.field("args"), Some(json!([1, 2])));
        assert_eq!(task.field("owner"), Some(Value::Null));
        assert_eq!(task.field("foo"), None);
        for name in Task::SEARCHABLE_FIELDS {
            assert!(task.field(name).is_some(), "{name} should be searchable");
        }
    }

    #[test]
    fn abandon_only_applies_to_running() {
        let task = Task::new(noop());
        let now = Utc::now();
        assert!(!task.abandon(now, &TaskError::Interrupted));
        task.start(now);
        assert!(task.abandon(now, &TaskError::Interrupted));
        assert_eq!(task.runs(), 0);
        assert_eq!(task.state(), TaskState::Error);
        assert_eq!(
            task.error_info().map(|i| i.code),
            Some("interrupted_by_restart".into())
        );
    }
}
