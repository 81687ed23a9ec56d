//! The game's time-warp controls, as seen by the coordinator

/// Local warp state the coordinator reads and drives.
///
/// Two rate tables exist: on-rails ("regular") warp and physics warp.
/// Index 0 of either table is real time.
pub trait TimeWarp {
    fn current_rate_index(&self) -> i32;

    fn is_physics_warp(&self) -> bool;

    /// Current multiplier of real time
    fn current_rate(&self) -> f32;

    /// Multiplier at `index` of the chosen table, if it exists
    fn rate_multiplier(&self, physics: bool, index: i32) -> Option<f32>;

    fn set_rate(&mut self, index: i32, physics: bool);

    fn universe_time(&self) -> f64;

    fn set_universe_time(&mut self, time: f64);
}

/// Regular warp multipliers
pub const REGULAR_WARP_RATES: [f32; 8] = [1.0, 5.0, 10.0, 50.0, 100.0, 1_000.0, 10_000.0, 100_000.0];

/// Physics warp multipliers
pub const PHYSICS_WARP_RATES: [f32; 4] = [1.0, 2.0, 3.0, 4.0];

/// A self-contained warp model: the rate tables above plus a universe time
/// that advances when told to.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedTimeWarp {
    index: i32,
    physics: bool,
    universe_time: f64,
}

impl SimulatedTimeWarp {
    pub fn new(universe_time: f64) -> Self {
        SimulatedTimeWarp {
            index: 0,
            physics: false,
            universe_time,
        }
    }

    /// Let `real_secs` of wall time pass at the current rate
    pub fn advance(&mut self, real_secs: f64) {
        self.universe_time += real_secs * f64::from(self.current_rate());
    }
}

impl Default for SimulatedTimeWarp {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn table(physics: bool) -> &'static [f32] {
    if physics {
        &PHYSICS_WARP_RATES
    } else {
        &REGULAR_WARP_RATES
    }
}

impl TimeWarp for SimulatedTimeWarp {
    fn current_rate_index(&self) -> i32 {
        self.index
    }

    fn is_physics_warp(&self) -> bool {
        self.physics
    }

    fn current_rate(&self) -> f32 {
        self.rate_multiplier(self.physics, self.index).unwrap_or(1.0)
    }

    fn rate_multiplier(&self, physics: bool, index: i32) -> Option<f32> {
        usize::try_from(index)
            .ok()
            .and_then(|i| table(physics).get(i).copied())
    }

    fn set_rate(&mut self, index: i32, physics: bool) {
        let max = table(physics).len() as i32 - 1;
        self.index = index.clamp(0, max);
        self.physics = physics;
    }

    fn universe_time(&self) -> f64 {
        self.universe_time
    }

    fn set_universe_time(&mut self, time: f64) {
        self.universe_time = time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_tables() {
        let mut game = SimulatedTimeWarp::new(10.0);
        assert_eq!(game.current_rate(), 1.0);
        game.set_rate(3, false);
        assert_eq!(game.current_rate(), 50.0);
        game.advance(2.0);
        assert_eq!(game.universe_time(), 110.0);

        game.set_rate(99, true);
        assert_eq!(game.current_rate_index(), 3);
        assert_eq!(game.current_rate(), 4.0);
        assert_eq!(game.rate_multiplier(true, -1), None);
    }
}
