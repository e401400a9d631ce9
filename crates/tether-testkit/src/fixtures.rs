//! Client fixtures
//!
//! Deterministic client records keyed by a small seed: seed `n` yields
//! registration id `reg-n`, endpoint `device-n` and address `10.0.0.n:5683`.

use crate::harness::TEST_EPOCH_MS;
use std::net::SocketAddr;
use std::time::Duration;
use tether_core::{Client, ClientUpdate, RegistrationId};

/// Lease used by fixtures unless overridden
pub const FIXTURE_LIFETIME: Duration = Duration::from_secs(60);

/// Registration id for a fixture seed
pub fn test_registration_id(seed: u32) -> RegistrationId {
    RegistrationId::new(format!("reg-{seed}"))
}

/// Endpoint name for a fixture seed
pub fn test_endpoint(seed: u32) -> String {
    format!("device-{seed}")
}

/// Source address for a fixture seed
pub fn test_address(seed: u32) -> SocketAddr {
    let [_, _, hi, lo] = seed.to_be_bytes();
    SocketAddr::from(([10, 0, hi, lo], 5683))
}

/// Lease-refresh update for a fixture seed
pub fn test_update(seed: u32) -> ClientUpdate {
    ClientUpdate::new(test_registration_id(seed))
}

/// Fluent builder for test clients
#[derive(Debug, Clone)]
pub struct ClientFixture {
    registration_id: RegistrationId,
    endpoint: String,
    address: SocketAddr,
    lifetime: Duration,
    registered_at_ms: u64,
}

impl ClientFixture {
    /// Fixture derived from `seed`
    pub fn new(seed: u32) -> Self {
        Self {
            registration_id: test_registration_id(seed),
            endpoint: test_endpoint(seed),
            address: test_address(seed),
            lifetime: FIXTURE_LIFETIME,
            registered_at_ms: TEST_EPOCH_MS,
        }
    }

    /// Override the registration id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.registration_id = RegistrationId::new(id);
        self
    }

    /// Override the endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the lease
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Stamp the registration time (default: [`TEST_EPOCH_MS`])
    pub fn at(mut self, now_ms: u64) -> Self {
        self.registered_at_ms = now_ms;
        self
    }

    /// Build the client; panics on an invalid fixture
    pub fn build(self) -> Client {
        Client::builder(self.registration_id, self.endpoint, self.address)
            .lifetime(self.lifetime)
            .registered_at(self.registered_at_ms)
            .build()
            .expect("fixture client must be valid")
    }
}

/// `count` distinct clients registered at `now_ms`, seeds `1..=count`
pub fn test_clients(count: u32, now_ms: u64) -> Vec<Client> {
    (1..=count)
        .map(|seed| ClientFixture::new(seed).at(now_ms).build())
        .collect()
}
