//! Physical clock abstraction
//!
//! Aliveness is evaluated against wall-clock milliseconds. The registry and
//! the in-memory store read time through [`PhysicalClock`] so tests can drive
//! expiry deterministically with [`SimulatedClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in unix milliseconds.
pub trait PhysicalClock: Send + Sync {
    /// Current unix time in milliseconds
    fn now_ms(&self) -> u64;
}

impl<T: PhysicalClock + ?Sized> PhysicalClock for Arc<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// System clock for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Create a new system clock
    pub fn new() -> Self {
        Self
    }
}

impl PhysicalClock for RealClock {
    fn now_ms(&self) -> u64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock for testing and simulation.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current_time: Arc<Mutex<u64>>,
}

impl SimulatedClock {
    /// Create a simulated clock starting at the given time
    pub fn new(start_time_ms: u64) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start_time_ms)),
        }
    }

    /// Create a simulated clock starting at the Unix epoch
    pub fn new_at_epoch() -> Self {
        Self::new(0)
    }

    /// Advance simulated time by the given duration
    pub fn advance(&self, duration: Duration) {
        let delta = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut time = self.current_time.lock();
        *time = time.saturating_add(delta);
    }

    /// Advance simulated time by a number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Set the absolute simulated time
    pub fn set_time(&self, time_ms: u64) {
        *self.current_time.lock() = time_ms;
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new_at_epoch()
    }
}

impl PhysicalClock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        *self.current_time.lock()
    }
}
