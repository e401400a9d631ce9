//! In-memory registration store.
//!
//! # Invariants
//!
//! - `by_endpoint[ep] == id` iff `by_id[id].endpoint == ep`
//! - At most one record per endpoint
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::RwLock` because every operation is a handful of map
//! operations and the lock is never held across `.await` points.

use crate::client::Client;
use crate::errors::Result;
use crate::identifiers::RegistrationId;
use crate::store::RegistrationStore;
use crate::time::{PhysicalClock, RealClock};
use crate::update::ClientUpdate;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct StoreState {
    by_id: HashMap<RegistrationId, Client>,
    by_endpoint: HashMap<String, RegistrationId>,
}

impl StoreState {
    fn remove(&mut self, id: &RegistrationId) -> Option<Client> {
        let removed = self.by_id.remove(id)?;
        if self.by_endpoint.get(&removed.endpoint) == Some(id) {
            self.by_endpoint.remove(&removed.endpoint);
        }
        Some(removed)
    }
}

/// Registration store backed by two hash maps.
///
/// Not durable; intended for single-process servers and tests.
#[derive(Clone)]
pub struct InMemoryRegistrationStore {
    state: Arc<RwLock<StoreState>>,
    clock: Arc<dyn PhysicalClock>,
}

impl InMemoryRegistrationStore {
    /// Empty store using the system clock for update stamps
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Empty store using the given clock for update stamps
    pub fn with_clock(clock: Arc<dyn PhysicalClock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            clock,
        }
    }

    /// Number of stored registrations
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    /// Whether the store holds no registrations
    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }
}

impl Default for InMemoryRegistrationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRegistrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistrationStore")
            .field("registrations", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn add_registration(&self, client: Client) -> Result<Option<Client>> {
        let mut state = self.state.write();

        let displaced_by_endpoint = state
            .by_endpoint
            .get(&client.endpoint)
            .filter(|id| **id != client.registration_id)
            .cloned();
        let mut previous = displaced_by_endpoint.and_then(|id| state.remove(&id));

        let same_id = state.remove(&client.registration_id);
        if previous.is_none() {
            previous = same_id;
        }

        state
            .by_endpoint
            .insert(client.endpoint.clone(), client.registration_id.clone());
        state.by_id.insert(client.registration_id.clone(), client);
        Ok(previous)
    }

    async fn update_registration(&self, update: &ClientUpdate) -> Result<Option<Client>> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state.write();
        let Some(existing) = state.by_id.get_mut(&update.registration_id) else {
            return Ok(None);
        };
        let updated = update.apply(existing, now_ms);
        *existing = updated.clone();
        Ok(Some(updated))
    }

    async fn remove_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        Ok(self.state.write().remove(id))
    }

    async fn get_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        Ok(self.state.read().by_id.get(id).cloned())
    }

    async fn get_registration_by_endpoint(&self, endpoint: &str) -> Result<Option<Client>> {
        let state = self.state.read();
        Ok(state
            .by_endpoint
            .get(endpoint)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn get_all_registrations(&self) -> Result<Vec<Client>> {
        Ok(self.state.read().by_id.values().cloned().collect())
    }
}
