//! Registry harness on a simulated clock

use crate::listeners::RecordingListener;
use crate::stores::FaultyStore;
use std::sync::Arc;
use std::time::Duration;
use tether_core::SimulatedClock;
use tether_registry::{ClientRegistry, RegistryConfig};

/// Start time of every harness clock (2024-01-01T00:00:00Z)
pub const TEST_EPOCH_MS: u64 = 1_704_067_200_000;

/// Registry, its store and its clock, wired together.
///
/// The store and the registry share one [`SimulatedClock`], so lease
/// refreshes and expiry sweeps agree on "now".
pub struct TestRegistry {
    /// Registry under test
    pub registry: ClientRegistry,
    /// Backing store, healthy until faults are injected
    pub store: FaultyStore,
    /// Shared clock
    pub clock: SimulatedClock,
}

impl TestRegistry {
    /// Harness with the given configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        let clock = SimulatedClock::new(TEST_EPOCH_MS);
        let store = FaultyStore::with_clock(Arc::new(clock.clone()));
        let registry = ClientRegistry::builder(Arc::new(store.clone()))
            .config(config)
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("test registry config must be valid");
        Self {
            registry,
            store,
            clock,
        }
    }

    /// Harness without a background cleaner; sweeps run via `run_sweep`
    pub fn manual() -> Self {
        Self::with_config(RegistryConfig::manual_only())
    }

    /// Harness with a fast background cleaner
    pub fn fast_cleanup() -> Self {
        Self::with_config(RegistryConfig::for_testing())
    }

    /// Current simulated time
    pub fn now_ms(&self) -> u64 {
        use tether_core::PhysicalClock;
        self.clock.now_ms()
    }

    /// Move simulated time forward
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Subscribe a fresh recording listener
    pub fn recording_listener(&self) -> Arc<RecordingListener> {
        let listener = Arc::new(RecordingListener::new());
        self.registry.add_listener(listener.clone());
        listener
    }
}

/// Registry without a background cleaner, see [`TestRegistry::manual`]
pub fn test_registry() -> TestRegistry {
    TestRegistry::manual()
}
