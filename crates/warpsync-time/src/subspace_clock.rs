//! Client-side subspace clock
//!
//! Tracks every subspace the server has announced, which one this client
//! is locked to (if any), and the skew rate the client reports back.

use std::collections::BTreeMap;

use warpsync_core::{
    clamp_rate, ClockTicks, Subspace, SubspaceId, WarpError, WarpResult, MAX_SUBSPACE_RATE,
};

/// Weight of the newest sample in the skew moving average
const SKEW_SMOOTHING: f32 = 0.1;

/// Samples closer together than this are ignored (seconds)
const MIN_SAMPLE_INTERVAL: f64 = 0.05;

/// The client's view of subspace timelines
#[derive(Debug)]
pub struct SubspaceClock {
    /// Known subspaces
    subspaces: BTreeMap<SubspaceId, Subspace>,
    /// Subspace this client is locked to
    current: Option<SubspaceId>,
    /// Smoothed rate at which the local simulation keeps up
    requested_rate: f32,
    /// Last (clock, universe time) progress sample
    last_sample: Option<(ClockTicks, f64)>,
}

impl SubspaceClock {
    pub fn new() -> Self {
        SubspaceClock {
            subspaces: BTreeMap::new(),
            current: None,
            requested_rate: MAX_SUBSPACE_RATE,
            last_sample: None,
        }
    }

    /// Record a subspace announced by the server
    pub fn add_subspace(&mut self, id: SubspaceId, epoch: Subspace) {
        self.subspaces.insert(id, epoch);
    }

    /// Replace the epoch of a relocked subspace
    pub fn relock_subspace(&mut self, id: SubspaceId, epoch: Subspace) {
        self.subspaces.insert(id, epoch);
    }

    /// Lock to a known subspace
    pub fn lock(&mut self, id: SubspaceId) -> WarpResult<()> {
        if !self.subspaces.contains_key(&id) {
            return Err(WarpError::UnknownSubspace(id));
        }
        self.current = Some(id);
        self.last_sample = None;
        Ok(())
    }

    /// Leave the current subspace (e.g. when warping freely)
    pub fn unlock(&mut self) {
        self.current = None;
        self.last_sample = None;
    }

    pub fn is_locked(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_subspace(&self) -> Option<SubspaceId> {
        self.current
    }

    pub fn subspace(&self, id: SubspaceId) -> Option<&Subspace> {
        self.subspaces.get(&id)
    }

    pub fn subspace_ids(&self) -> impl Iterator<Item = SubspaceId> + '_ {
        self.subspaces.keys().copied()
    }

    /// Projected universe time of a subspace
    pub fn universe_time(&self, id: SubspaceId, now: ClockTicks) -> WarpResult<f64> {
        self.subspaces
            .get(&id)
            .map(|s| s.universe_time_at(now))
            .ok_or(WarpError::UnknownSubspace(id))
    }

    /// Projected universe time of the locked subspace
    pub fn current_universe_time(&self, now: ClockTicks) -> Option<f64> {
        let id = self.current?;
        self.universe_time(id, now).ok()
    }

    /// Rate to report for consensus
    pub fn requested_rate(&self) -> f32 {
        self.requested_rate
    }

    pub fn set_requested_rate(&mut self, rate: f32) {
        self.requested_rate = clamp_rate(rate);
    }

    /// Feed how far the local simulation actually advanced.
    ///
    /// While locked, each sample's universe-seconds per wall-second is blended
    /// into the requested rate, so a client that cannot keep up asks its
    /// subspace to slow down.
    pub fn record_progress(&mut self, now: ClockTicks, universe_time: f64) {
        if !self.is_locked() {
            return;
        }
        let Some((last_clock, last_time)) = self.last_sample else {
            self.last_sample = Some((now, universe_time));
            return;
        };
        let dt = now.secs_since(last_clock);
        if dt < MIN_SAMPLE_INTERVAL {
            return;
        }
        let observed = ((universe_time - last_time) / dt) as f32;
        let blended = self.requested_rate * (1.0 - SKEW_SMOOTHING) + observed * SKEW_SMOOTHING;
        self.requested_rate = clamp_rate(blended);
        self.last_sample = Some((now, universe_time));
    }
}

impl Default for SubspaceClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use warpsync_core::{MIN_SUBSPACE_RATE, TICKS_PER_SECOND};

    fn secs(s: i64) -> ClockTicks {
        ClockTicks::new(s * TICKS_PER_SECOND)
    }

    #[test]
    fn test_lock_requires_known_subspace() {
        let mut clock = SubspaceClock::new();
        assert!(clock.lock(SubspaceId::new(1)).is_err());

        clock.add_subspace(SubspaceId::new(1), Subspace::new(secs(0), 100.0, 1.0));
        clock.lock(SubspaceId::new(1)).unwrap();
        assert_eq!(clock.current_subspace(), Some(SubspaceId::new(1)));
        assert_eq!(clock.current_universe_time(secs(10)), Some(110.0));
    }

    #[test]
    fn test_relock_replaces_epoch() {
        let mut clock = SubspaceClock::new();
        let id = SubspaceId::new(0);
        clock.add_subspace(id, Subspace::new(secs(0), 100.0, 1.0));
        clock.relock_subspace(id, Subspace::new(secs(10), 110.0, 0.5));
        let t = clock.universe_time(id, secs(20)).unwrap();
        assert!((t - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_skew_drops_when_simulation_lags() {
        let mut clock = SubspaceClock::new();
        let id = SubspaceId::new(0);
        clock.add_subspace(id, Subspace::new(secs(0), 0.0, 1.0));
        clock.lock(id).unwrap();

        // Simulation only manages 0.6 universe seconds per second
        for i in 0..60 {
            clock.record_progress(secs(i), i as f64 * 0.6);
        }
        assert!(clock.requested_rate() < 0.7);
        assert!(clock.requested_rate() >= 0.6);
    }

    #[test]
    fn test_skew_ignored_while_unlocked() {
        let mut clock = SubspaceClock::new();
        for i in 0..10 {
            clock.record_progress(secs(i), i as f64 * 0.1);
        }
        assert_eq!(clock.requested_rate(), MAX_SUBSPACE_RATE);
    }

    #[test]
    fn test_requested_rate_clamped() {
        let mut clock = SubspaceClock::new();
        clock.set_requested_rate(-3.0);
        assert_eq!(clock.requested_rate(), 0.3);
        clock.set_requested_rate(7.0);
        assert_eq!(clock.requested_rate(), 1.0);
    }

    proptest! {
        #[test]
        fn prop_requested_rate_stays_in_bounds(progress in proptest::collection::vec(-50.0f64..50.0, 1..40)) {
            let mut clock = SubspaceClock::new();
            let id = SubspaceId::new(0);
            clock.add_subspace(id, Subspace::new(secs(0), 0.0, 1.0));
            clock.lock(id).unwrap();

            let mut universe = 0.0;
            for (i, step) in progress.iter().enumerate() {
                universe += step;
                clock.record_progress(secs(i as i64), universe);
                let rate = clock.requested_rate();
                prop_assert!((MIN_SUBSPACE_RATE..=MAX_SUBSPACE_RATE).contains(&rate));
            }
        }
    }
}
