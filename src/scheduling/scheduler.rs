//! # Scheduler strategies for tasks.
//!
//! [`Scheduler`] determines when a task should next become eligible.
//!
//! - [`Scheduler::Immediate`] the task runs once, as soon as possible.
//! - [`Scheduler::At`] the task runs once at a fixed time.
//! - [`Scheduler::Interval`] the task runs every `period`, optionally at most `max_runs` times.
//!
//! Strategies never read the clock: the caller passes `now`, and the task passes
//! the number of firings it has completed. This keeps them deterministic and
//! trivially serializable.
//!
//! ## Choosing the right strategy
//! ```text
//! Scheduler::Immediate                       → run now, never again
//! Scheduler::At { when }                     → run at `when`, never again
//! Scheduler::Interval {
//!     period, start: Some(s), max_runs: Some(n)
//! }                                          → run at s, s+period, ... n times
//! Scheduler::Interval { start: None, .. }    → first run at now+period
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Answer of [`Scheduler::next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextRun {
    /// Eligible right away; the task carries no scheduled time.
    Immediately,
    /// Eligible at the given time.
    At(DateTime<Utc>),
    /// No further firing.
    Exhausted,
}

/// Strategy computing a task's eligible times.
///
/// Two schedulers are equivalent when they are equal by value; task uniqueness
/// checks rely on that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scheduler {
    /// Run once, immediately (default).
    #[default]
    Immediate,
    /// Run once at `when`.
    At {
        /// Eligible time of the single firing.
        when: DateTime<Utc>,
    },
    /// Run repeatedly every `period`.
    Interval {
        /// Time between two consecutive firings.
        period: Duration,
        /// First eligible time; `None` means `now + period` at first scheduling.
        start: Option<DateTime<Utc>>,
        /// Maximum number of firings; `None` means unbounded.
        max_runs: Option<u32>,
    },
}

impl Scheduler {
    /// Shorthand for [`Scheduler::At`].
    pub fn at(when: DateTime<Utc>) -> Self {
        Scheduler::At { when }
    }

    /// Shorthand for [`Scheduler::Interval`].
    pub fn interval(period: Duration, start: Option<DateTime<Utc>>, max_runs: Option<u32>) -> Self {
        Scheduler::Interval {
            period,
            start,
            max_runs,
        }
    }

    /// Returns true for strategies that may fire more than once.
    pub fn is_repeating(&self) -> bool {
        matches!(self, Scheduler::Interval { .. })
    }

    /// Stable label used in snapshots and logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Scheduler::Immediate => "immediate",
            Scheduler::At { .. } => "at",
            Scheduler::Interval { .. } => "interval",
        }
    }

    /// Computes the next eligible time.
    ///
    /// ### Parameters
    /// - `previous`: the eligible time of the last firing, if known
    /// - `fired`: how many firings have completed so far
    /// - `now`: current wall-clock time
    ///
    /// ### Rules
    /// - `Immediate` and `At` fire once (`fired == 0`), then report `Exhausted`.
    /// - `Interval` reports `Exhausted` once `fired >= max_runs`; the first firing is
    ///   `start` (or `now + period`), each later one is `previous + period`.
    /// - An eligible time that cannot be represented counts as `Exhausted`.
    pub fn next(&self, previous: Option<DateTime<Utc>>, fired: u32, now: DateTime<Utc>) -> NextRun {
        match *self {
            Scheduler::Immediate if fired == 0 => NextRun::Immediately,
            Scheduler::At { when } if fired == 0 => NextRun::At(when),
            Scheduler::Immediate | Scheduler::At { .. } => NextRun::Exhausted,
            Scheduler::Interval {
                period,
                start,
                max_runs,
            } => {
                if max_runs.is_some_and(|max| fired >= max) {
                    return NextRun::Exhausted;
                }
                let next = match (fired, start, previous) {
                    (0, Some(start), _) => Some(start),
                    (0, None, _) | (_, _, None) => add(now, period),
                    (_, _, Some(prev)) => add(prev, period),
                };
                next.map_or(NextRun::Exhausted, NextRun::At)
            }
        }
    }
}

fn add(at: DateTime<Utc>, period: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(period)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn immediate_fires_once() {
        let s = Scheduler::Immediate;
        assert_eq!(s.next(None, 0, t0()), NextRun::Immediately);
        assert_eq!(s.next(None, 1, t0()), NextRun::Exhausted);
    }

    #[test]
    fn at_fires_once_at_fixed_time() {
        let when = t0() + TimeDelta::seconds(10);
        let s = Scheduler::at(when);
        assert_eq!(s.next(None, 0, t0()), NextRun::At(when));
        assert_eq!(s.next(Some(when), 1, t0()), NextRun::Exhausted);
    }

    #[test]
    fn interval_with_start_and_limit() {
        let start = t0() + TimeDelta::seconds(5);
        let s = Scheduler::interval(Duration::from_secs(5), Some(start), Some(2));

        let first = s.next(None, 0, t0());
        assert_eq!(first, NextRun::At(start));
        let second = s.next(Some(start), 1, start);
        assert_eq!(second, NextRun::At(start + TimeDelta::seconds(5)));
        assert_eq!(
            s.next(Some(start + TimeDelta::seconds(5)), 2, start),
            NextRun::Exhausted
        );
    }

    #[test]
    fn interval_without_start_begins_one_period_from_now() {
        let s = Scheduler::interval(Duration::from_secs(10), None, None);
        assert_eq!(s.next(None, 0, t0()), NextRun::At(t0() + TimeDelta::seconds(10)));
        // Unbounded: still firing after many runs.
        assert_eq!(
            s.next(Some(t0()), 1_000, t0()),
            NextRun::At(t0() + TimeDelta::seconds(10))
        );
    }

    #[test]
    fn interval_with_zero_runs_is_exhausted_immediately() {
        let s = Scheduler::interval(Duration::from_secs(1), None, Some(0));
        assert_eq!(s.next(None, 0, t0()), NextRun::Exhausted);
    }

    #[test]
    fn unrepresentable_time_is_exhausted() {
        let s = Scheduler::interval(Duration::MAX, None, None);
        assert_eq!(s.next(None, 0, t0()), NextRun::Exhausted);
    }

    #[test]
    fn equivalence_is_by_value() {
        let a = Scheduler::at(t0());
        assert_eq!(a, Scheduler::at(t0()));
        assert_ne!(a, Scheduler::Immediate);
        assert!(!a.is_repeating());
        assert!(Scheduler::interval(Duration::from_secs(1), None, None).is_repeating());
    }

    #[test]
    fn serde_keeps_variant() {
        let s = Scheduler::interval(Duration::from_millis(1500), Some(t0()), Some(3));
        let json = serde_json::to_value(s).expect("serialize");
        assert_eq!(json["type"], "interval");
        let back: Scheduler = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, s);
    }
}
