//! Fault-injecting store
//!
//! [`FaultyStore`] delegates to an [`InMemoryRegistrationStore`] and
//! misbehaves for chosen registration ids: it can return a storage error,
//! panic, or stall before answering. Faults apply to the per-id operations
//! (`get_registration`, `update_registration`, `remove_registration`).
//! Snapshot failures are toggled separately.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Client, ClientUpdate, InMemoryRegistrationStore, PhysicalClock, RegistrationId,
    RegistrationStore, Result, TetherError,
};

/// How a store operation for one id misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Return `TetherError::Storage`
    Fail,
    /// Panic inside the store call
    Panic,
    /// Sleep before delegating
    Delay(Duration),
}

/// Store wrapper with per-id fault injection
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: InMemoryRegistrationStore,
    faults: Arc<Mutex<HashMap<RegistrationId, StoreFault>>>,
    fail_snapshot: Arc<AtomicBool>,
}

impl FaultyStore {
    /// Healthy store on top of `inner`
    pub fn new(inner: InMemoryRegistrationStore) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(HashMap::new())),
            fail_snapshot: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Healthy store stamping updates with `clock`
    pub fn with_clock(clock: Arc<dyn PhysicalClock>) -> Self {
        Self::new(InMemoryRegistrationStore::with_clock(clock))
    }

    /// Misbehave for `id` from now on
    pub fn inject(&self, id: RegistrationId, fault: StoreFault) {
        self.faults.lock().insert(id, fault);
    }

    /// Stop misbehaving for `id`
    pub fn heal(&self, id: &RegistrationId) {
        self.faults.lock().remove(id);
    }

    /// Make `get_all_registrations` fail (or succeed again)
    pub fn set_snapshot_failure(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    /// The wrapped store
    pub fn inner(&self) -> &InMemoryRegistrationStore {
        &self.inner
    }

    async fn trip(&self, id: &RegistrationId, operation: &str) -> Result<()> {
        let fault = self.faults.lock().get(id).copied();
        match fault {
            None => Ok(()),
            Some(StoreFault::Fail) => Err(TetherError::storage(format!(
                "injected {operation} failure for {id}"
            ))),
            Some(StoreFault::Panic) => panic!("injected {operation} panic for {id}"),
            Some(StoreFault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RegistrationStore for FaultyStore {
    async fn add_registration(&self, client: Client) -> Result<Option<Client>> {
        self.inner.add_registration(client).await
    }

    async fn update_registration(&self, update: &ClientUpdate) -> Result<Option<Client>> {
        self.trip(&update.registration_id, "update").await?;
        self.inner.update_registration(update).await
    }

    async fn remove_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        self.trip(id, "remove").await?;
        self.inner.remove_registration(id).await
    }

    async fn get_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        self.trip(id, "get").await?;
        self.inner.get_registration(id).await
    }

    async fn get_registration_by_endpoint(&self, endpoint: &str) -> Result<Option<Client>> {
        self.inner.get_registration_by_endpoint(endpoint).await
    }

    async fn get_all_registrations(&self) -> Result<Vec<Client>> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(TetherError::storage("injected snapshot failure"));
        }
        self.inner.get_all_registrations().await
    }
}
