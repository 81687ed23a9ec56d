//! Subspace epochs
//!
//! A subspace is a timeline anchored at a (clock, universe time) pair and
//! advancing at a fixed rate until it is re-anchored:
//!
//! `universe_time(t) = epoch_time + (t - epoch_clock) / 1e7 * rate`

use crate::ClockTicks;

/// Slowest rate a subspace may run at
pub const MIN_SUBSPACE_RATE: f32 = 0.3;

/// Fastest rate a subspace may run at (real time)
pub const MAX_SUBSPACE_RATE: f32 = 1.0;

/// Rate drift a subspace absorbs silently before it is relocked
pub const RELOCK_THRESHOLD: f32 = 0.03;

/// Universe time of the synthesized first subspace
pub const DEFAULT_EPOCH_TIME: f64 = 100.0;

/// Clamp a reported or requested rate into the subspace bounds.
/// NaN maps to the lower bound.
#[inline]
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return MIN_SUBSPACE_RATE;
    }
    rate.clamp(MIN_SUBSPACE_RATE, MAX_SUBSPACE_RATE)
}

/// An independently anchored timeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Subspace {
    /// Clock reading of the anchor
    pub epoch_clock: ClockTicks,
    /// Universe time at the anchor (seconds)
    pub epoch_time: f64,
    /// Universe seconds per wall clock second, within the rate bounds
    pub rate: f32,
}

impl Subspace {
    /// Create a subspace; the rate is clamped into bounds
    pub fn new(epoch_clock: ClockTicks, epoch_time: f64, rate: f32) -> Self {
        Subspace {
            epoch_clock,
            epoch_time,
            rate: clamp_rate(rate),
        }
    }

    /// Subspace 0 as synthesized when nothing was persisted
    pub fn initial(now: ClockTicks) -> Self {
        Subspace::new(now, DEFAULT_EPOCH_TIME, MAX_SUBSPACE_RATE)
    }

    /// Universe time projected at clock reading `now`
    #[inline]
    pub fn universe_time_at(&self, now: ClockTicks) -> f64 {
        self.epoch_time + now.secs_since(self.epoch_clock) * self.rate as f64
    }

    /// Move the anchor to `now` without changing the timeline
    pub fn reanchor(&mut self, now: ClockTicks) {
        self.epoch_time = self.universe_time_at(now);
        self.epoch_clock = now;
    }

    /// Re-anchor at `now`, then swap in a new rate.
    /// Universe time at `now` is identical before and after.
    pub fn rerate(&mut self, now: ClockTicks, rate: f32) {
        self.reanchor(now);
        self.rate = clamp_rate(rate);
    }

    /// Whether `rate` is far enough from the current rate to warrant a relock
    #[inline]
    pub fn drifted_from(&self, rate: f32, threshold: f32) -> bool {
        (self.rate - rate).abs() > threshold
    }
}
