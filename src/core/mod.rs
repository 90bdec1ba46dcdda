//! Runtime core: the queue, its dispatch loop, and lifecycle.
//!
//! The public API from this module is [`TaskQueue`] (built through
//! [`QueueBuilder`] from a [`QueueConfig`]).
//!
//! Internal modules:
//! - [`queue`]: enqueue/find/exists/cancel/remove, shutdown;
//! - [`dispatcher`]: waits for due tasks and hands them to workers;
//! - [`runner`]: executes one firing with timeout/cancellation;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod dispatcher;
mod queue;
pub(crate) mod runner;
mod shutdown;

pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use queue::TaskQueue;

pub(crate) use runner::panic_message;
