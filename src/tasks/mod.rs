//! # Tasks: units of deferred work.
//!
//! This module provides the task-related types:
//! - [`Task`] - handle to a unit of work and its lifecycle state machine
//! - [`TaskBuilder`] - fluent construction of tasks
//! - [`Callable`] - trait for async cancelable executable logic
//! - [`CallableFn`] - closure-backed callable
//! - [`CallableRegistry`] - resolves persisted callable bindings
//! - [`TaskSnapshot`] - serializable projection of a task

mod builder;
mod callable;
mod callable_fn;
mod registry;
mod snapshot;
mod state;
mod task;

pub use builder::TaskBuilder;
pub use callable::{Binding, BoxCallFuture, Callable, CallableRef, Invocation};
pub use callable_fn::CallableFn;
pub use registry::CallableRegistry;
pub use snapshot::{SerializedFields, TaskSnapshot};
pub use state::{TaskId, TaskKind, TaskState};
pub use task::{Fingerprint, Task};
