use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::scheduling::Scheduler;
use crate::tasks::callable::CallableRef;
use crate::tasks::state::{TaskId, TaskKind};
use crate::tasks::task::Task;

/// Builder for [`Task`] with fluent API
#[derive(Clone)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    kind: TaskKind,
    callable: CallableRef,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    scheduler: Scheduler,
    timeout: Option<Duration>,
}

impl TaskBuilder {
    /// Creates a new builder running `callable` immediately, with no arguments and no timeout
    pub fn new(callable: CallableRef) -> Self {
        Self {
            id: None,
            kind: TaskKind::Generic,
            callable,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            scheduler: Scheduler::Immediate,
            timeout: None,
        }
    }

    /// Uses an explicit id instead of a fresh one
    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn kwargs(mut self, kwargs: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.kwargs = kwargs.into_iter().collect();
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Zero means no timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (timeout > Duration::ZERO).then_some(timeout);
        self
    }

    /// Build the waiting task
    pub fn build(self) -> Task {
        Task::from_parts(
            self.id.unwrap_or_default(),
            self.kind,
            self.callable,
            self.args,
            self.kwargs,
            Task::fresh_status(self.scheduler, self.timeout),
        )
    }
}
