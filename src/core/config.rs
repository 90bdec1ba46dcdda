//! # Queue configuration.
//!
//! Provides [`QueueConfig`] centralized settings for a [`TaskQueue`](crate::TaskQueue).
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited (no semaphore created)
//! - `timeout = 0s` → no default timeout

use std::time::Duration;

/// Configuration for a task queue.
///
/// ## Field semantics
/// - `grace`: maximum wait for in-flight workers on shutdown
/// - `max_concurrent`: worker concurrency limit (`0` = unlimited)
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `timeout`: default per-task timeout for tasks enqueued without one (`0s` = none)
///
/// All fields are public; prefer the helper accessors over sprinkling
/// sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum time to wait for running tasks after shutdown cancels them.
    ///
    /// If exceeded, `shutdown` returns `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Maximum number of tasks executing at once.
    ///
    /// - `0` = unlimited (no semaphore)
    /// - `n > 0` = at most `n` workers run simultaneously; due tasks wait
    ///   in the waiting set until a slot frees up.
    pub max_concurrent: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Default task timeout, applied at enqueue to tasks that carry none.
    pub timeout: Duration,
}

impl QueueConfig {
    /// Returns the concurrency limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent == 0 {
            None
        } else {
            Some(self.max_concurrent)
        }
    }

    /// Returns the default per-task timeout as an `Option` (`None` = no timeout).
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout == Duration::ZERO {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for QueueConfig {
    /// - `grace = 60s`
    /// - `max_concurrent = 0` (unlimited)
    /// - `bus_capacity = 1024`
    /// - `timeout = 0s` (no timeout)
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            max_concurrent: 0,
            bus_capacity: 1024,
            timeout: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_none() {
        let cfg = QueueConfig {
            bus_capacity: 0,
            ..QueueConfig::default()
        };
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.default_timeout(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);

        let cfg = QueueConfig {
            max_concurrent: 4,
            timeout: Duration::from_secs(3),
            ..QueueConfig::default()
        };
        assert_eq!(cfg.concurrency_limit(), Some(4));
        assert_eq!(cfg.default_timeout(), Some(Duration::from_secs(3)));
    }
}
