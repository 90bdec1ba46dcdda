//! # Task snapshots.
//!
//! A [`TaskSnapshot`] is a serializable projection of a [`Task`] used for durable
//! storage and reconstruction. Its fields fall into two partitions:
//!
//! - **copied** ([`TaskSnapshot::COPIED_FIELDS`]): plain values stored as they are
//!   (id, state, timestamps, arguments, result, ...);
//! - **serialized** ([`TaskSnapshot::SERIALIZED_FIELDS`]): objects that need custom
//!   encoding, nested under `"serialized"`: the scheduler (tagged by strategy) and
//!   the callable (stored as its [`Binding`]).
//!
//! ## Wire shape
//! ```text
//! {
//!   "id": "…", "kind": {"type": "generic"}, "state": "waiting",
//!   "args": [...], "kwargs": {...},
//!   "scheduled_time": "…", "last_scheduled_time": null, "runs": 0,
//!   "timeout": {"secs": 2, "nanos": 0}, "start_time": null, "finish_time": null,
//!   "result": null, "error_info": null,
//!   "serialized": {
//!     "scheduler": {"type": "interval", "period": {...}, "start": null, "max_runs": 2},
//!     "callable":  {"symbol": "repo.sync", "owner": "repo-1"}
//!   }
//! }
//! ```
//!
//! ## Round-trip
//! `snapshot.to_task(&registry)` rebuilds a task whose copied fields are equal and
//! whose serialized fields are type-equivalent (same scheduler strategy, callable
//! re-resolved to the same binding). Identity is not preserved: the rebuilt task
//! is a new handle with a fresh cancellation token.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorInfo, SnapshotError};
use crate::scheduling::Scheduler;
use crate::storage::Document;
use crate::tasks::callable::Binding;
use crate::tasks::registry::CallableRegistry;
use crate::tasks::state::{TaskId, TaskKind, TaskState};
use crate::tasks::task::{Status, Task};

/// Fields that need custom serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedFields {
    /// Scheduling strategy.
    pub scheduler: Scheduler,
    /// Callable identity, resolved through a [`CallableRegistry`].
    pub callable: Binding,
}

/// Serializable projection of a [`Task`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub last_scheduled_time: Option<DateTime<Utc>>,
    pub runs: u32,
    pub timeout: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_info: Option<ErrorInfo>,
    pub serialized: SerializedFields,
}

impl TaskSnapshot {
    /// Plain-copy fields.
    pub const COPIED_FIELDS: &'static [&'static str] = &[
        "id",
        "kind",
        "state",
        "args",
        "kwargs",
        "scheduled_time",
        "last_scheduled_time",
        "runs",
        "timeout",
        "start_time",
        "finish_time",
        "result",
        "error_info",
    ];

    /// Fields stored under `"serialized"`.
    pub const SERIALIZED_FIELDS: &'static [&'static str] = &["scheduler", "callable"];

    /// Rebuilds a task, resolving the callable through `registry`.
    pub fn to_task(&self, registry: &CallableRegistry) -> Result<Task, SnapshotError> {
        let callable = registry.resolve(&self.serialized.callable)?;
        let status = Status {
            state: self.state,
            scheduler: self.serialized.scheduler,
            scheduled_time: self.scheduled_time,
            last_scheduled_time: self.last_scheduled_time,
            runs: self.runs,
            timeout: self.timeout,
            start_time: self.start_time,
            finish_time: self.finish_time,
            result: self.result.clone(),
            error_info: self.error_info.clone(),
        };
        Ok(Task::from_parts(
            self.id,
            self.kind.clone(),
            callable,
            self.args.clone(),
            self.kwargs.clone(),
            status,
        ))
    }

    /// Encodes the snapshot as a document-store document.
    pub fn to_document(&self) -> Result<Document, SnapshotError> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            // A struct always serializes to an object.
            other => Err(SnapshotError::Malformed(serde::ser::Error::custom(format!(
                "snapshot encoded as {other}"
            )))),
        }
    }

    /// Decodes a document produced by [`TaskSnapshot::to_document`].
    ///
    /// Unknown extra keys (such as storage bookkeeping) are ignored.
    pub fn from_document(doc: Document) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}

impl Task {
    /// Takes a snapshot of the task; valid in any state, including mid-run.
    pub fn snapshot(&self) -> TaskSnapshot {
        let status = self.status();
        TaskSnapshot {
            id: self.id(),
            kind: self.kind().clone(),
            state: status.state,
            args: self.args().to_vec(),
            kwargs: self.kwargs().clone(),
            scheduled_time: status.scheduled_time,
            last_scheduled_time: status.last_scheduled_time,
            runs: status.runs,
            timeout: status.timeout,
            start_time: status.start_time,
            finish_time: status.finish_time,
            result: status.result,
            error_info: status.error_info,
            serialized: SerializedFields {
                scheduler: status.scheduler,
                callable: self.binding().clone(),
            },
        }
    }

    /// Rebuilds a task from its snapshot (see [`TaskSnapshot::to_task`]).
    pub fn from_snapshot(
        snapshot: &TaskSnapshot,
        registry: &CallableRegistry,
    ) -> Result<Task, SnapshotError> {
        snapshot.to_task(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::{CallableFn, CallableRef, Invocation};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn noop() -> CallableRef {
        CallableFn::arc("noop", |_inv: Invocation| async { Ok::<_, TaskError>(Value::Null) })
    }

    fn method(owner: &str) -> CallableRef {
        Arc::new(CallableFn::bound("Class.method", owner, |_inv: Invocation| async {
            Ok::<_, TaskError>(Value::Null)
        }))
    }

    fn registry() -> CallableRegistry {
        let mut reg = CallableRegistry::new();
        reg.register(noop());
        reg.register_method("Class.method", |owner| Some(method(owner)));
        reg
    }

    #[test]
    fn fresh_task_round_trips() {
        let task = Task::new(noop());
        let restored = task.snapshot().to_task(&registry()).expect("restore");
        assert_eq!(restored.state(), TaskState::Waiting);
        assert_eq!(restored.id(), task.id());
        assert!(!restored.ptr_eq(&task));
        assert_eq!(restored.snapshot(), task.snapshot());
    }

    #[tokio::test]
    async fn finished_and_failed_tasks_round_trip() {
        let task = Task::builder(noop()).args([json!(1), json!(2), json!("foo")]).build();
        task.run().await;
        let restored = Task::from_snapshot(&task.snapshot(), &registry()).expect("restore");
        assert_eq!(restored.state(), TaskState::Finished);
        assert_eq!(restored.args(), task.args());

        let failing: CallableRef = CallableFn::arc("error", |_inv: Invocation| async {
            Err::<Value, _>(TaskError::fail("Aaaargh!"))
        });
        let mut reg = registry();
        reg.register(failing.clone());
        let task = Task::new(failing);
        task.run().await;
        let restored = task.snapshot().to_task(&reg).expect("restore");
        assert_eq!(restored.state(), TaskState::Error);
        assert!(restored.error_info().is_some());
    }

    #[test]
    fn every_partitioned_field_survives_the_document_round_trip() {
        let task = Task::builder(method("obj-1"))
            .kind(TaskKind::Domain {
                kind: "repo_sync".into(),
                payload: json!({ "repo": "obj-1" }),
            })
            .kwarg("arg1", json!(1))
            .scheduler(Scheduler::interval(Duration::from_secs(30), None, Some(3)))
            .timeout(Duration::from_secs(2))
            .build();
        task.schedule();

        let doc = task.snapshot().to_document().expect("encode");
        for field in TaskSnapshot::COPIED_FIELDS {
            assert!(doc.contains_key(*field), "missing copied field {field}");
        }
        let serialized = doc["serialized"].as_object().expect("serialized partition");
        for field in TaskSnapshot::SERIALIZED_FIELDS {
            assert!(serialized.contains_key(*field), "missing serialized field {field}");
        }

        let restored = TaskSnapshot::from_document(doc)
            .expect("decode")
            .to_task(&registry())
            .expect("restore");
        assert_eq!(restored.snapshot(), task.snapshot());
        assert!(restored.scheduler().is_repeating());
        assert_eq!(restored.binding(), task.binding());
        assert_eq!(restored.kind().name(), "repo_sync");
    }

    #[test]
    fn sub_millisecond_timeouts_survive_the_document_round_trip() {
        for timeout in [
            Duration::from_micros(1500),
            Duration::from_micros(500),
            Duration::from_nanos(7),
        ] {
            let task = Task::builder(noop()).timeout(timeout).build();
            let doc = task.snapshot().to_document().expect("encode");
            let restored = TaskSnapshot::from_document(doc)
                .expect("decode")
                .to_task(&registry())
                .expect("restore");
            assert_eq!(restored.timeout(), Some(timeout));
        }
    }

    #[test]
    fn unregistered_callable_fails_to_restore() {
        let task = Task::new(CallableFn::arc("nowhere", |_inv: Invocation| async {
            Ok::<_, TaskError>(Value::Null)
        }));
        let err = task.snapshot().to_task(&registry()).err();
        assert!(matches!(err, Some(SnapshotError::UnknownCallable { .. })));
    }

    #[test]
    fn canceled_snapshot_restores_canceled_token() {
        let task = Task::new(noop());
        task.cancel(Utc::now());
        let restored = task.snapshot().to_task(&registry()).expect("restore");
        assert_eq!(restored.state(), TaskState::Canceled);
        assert!(restored.token().is_cancelled());
    }
}
