//! Scheduling strategies.
//!
//! A [`Scheduler`] decides **when** a task becomes eligible to run, and whether it
//! runs again after a firing.
//!
//! ## Contents
//! - [`Scheduler`] immediate / one-shot at a time / fixed interval with an optional run limit
//! - [`NextRun`] answer of a scheduler: run immediately, run at a time, or exhausted
//!
//! ## Quick wiring
//! ```text
//! Task { scheduler, runs, scheduled_time }
//!      └─► Task::schedule(now) calls scheduler.next(scheduled_time, runs, now)
//!           - Immediately → scheduled_time = None (eligible right away)
//!           - At(t)       → scheduled_time = Some(t)
//!           - Exhausted   → not (re-)armed
//! ```

mod scheduler;

pub use scheduler::{NextRun, Scheduler};
