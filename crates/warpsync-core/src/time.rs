//! Time primitives for warpsync
//!
//! Two notions of time coexist:
//! - Clock ticks: the shared wall clock, 100 ns resolution, since a fixed reference
//! - Universe time: the simulated world clock in seconds (plain `f64`),
//!   which diverges between subspaces

use std::ops::{Add, Sub};
use std::time::Duration;

/// Number of clock ticks in one second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Wall clock reading in 100 ns ticks
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct ClockTicks(pub i64);

impl ClockTicks {
    pub const ZERO: ClockTicks = ClockTicks(0);
    pub const MIN: ClockTicks = ClockTicks(i64::MIN);

    #[inline]
    pub fn new(ticks: i64) -> Self {
        ClockTicks(ticks)
    }

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        ClockTicks((secs * TICKS_PER_SECOND as f64) as i64)
    }

    #[inline]
    pub fn as_ticks(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is in the future)
    #[inline]
    pub fn secs_since(self, earlier: ClockTicks) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / TICKS_PER_SECOND as f64
    }

    #[inline]
    pub fn saturating_add(self, d: Duration) -> Self {
        ClockTicks(self.0.saturating_add(duration_to_ticks(d)))
    }
}

impl Add<Duration> for ClockTicks {
    type Output = ClockTicks;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub for ClockTicks {
    type Output = i64;

    fn sub(self, rhs: ClockTicks) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Convert a duration to clock ticks, saturating at `i64::MAX`
#[inline]
pub fn duration_to_ticks(d: Duration) -> i64 {
    i64::try_from(d.as_nanos() / 100).unwrap_or(i64::MAX)
}
