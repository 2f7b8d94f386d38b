use std::cell::Cell;
use std::time::Duration;

use crate::scheduling::domain::clock::Clock;

/// Clock advanced explicitly by its owner.
///
/// Drives headless runs at a fixed simulated refresh rate and makes every
/// loop deterministic under test.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Moves the clock to `at`. Earlier instants are ignored.
    pub fn set(&self, at: Duration) {
        if at > self.now.get() {
            self.now.set(at);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}
