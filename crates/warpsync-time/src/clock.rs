//! Wall clock implementations

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use warpsync_core::{duration_to_ticks, ClockTicks};

/// Monotonic wall clock shared by the server and its clients.
/// On a client this is the server-synchronized clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> ClockTicks;
}

/// System clock: 100 ns ticks since the Unix epoch, advanced monotonically
pub struct SystemClock {
    /// Wall time at construction
    base: ClockTicks,
    /// Monotonic reference taken at construction
    reference: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        SystemClock {
            base: ClockTicks::new(duration_to_ticks(since_epoch)),
            reference: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTicks {
        self.base + self.reference.elapsed()
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    pub fn new(start: ClockTicks) -> Self {
        ManualClock {
            ticks: AtomicI64::new(start.as_ticks()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, d: Duration) -> ClockTicks {
        let delta = duration_to_ticks(d);
        let prev = self.ticks.fetch_add(delta, Ordering::SeqCst);
        ClockTicks::new(prev.saturating_add(delta))
    }

    /// Jump to a reading; never moves backwards
    pub fn set(&self, t: ClockTicks) {
        self.ticks.fetch_max(t.as_ticks(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockTicks {
        ClockTicks::new(self.ticks.load(Ordering::SeqCst))
    }
}
