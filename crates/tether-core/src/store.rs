//! Registration store interface
//!
//! The store owns the canonical client records. Every operation must be
//! atomic with respect to both indexes (registration id and endpoint) and
//! return promptly.

use crate::client::Client;
use crate::errors::Result;
use crate::identifiers::RegistrationId;
use crate::update::ClientUpdate;
use async_trait::async_trait;
use std::sync::Arc;

/// Keyed persistence for client records.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a registration.
    ///
    /// Returns the record displaced by this insert: the previous holder of
    /// the same endpoint, or an existing record with the same registration id.
    /// When both exist, only the endpoint holder is returned; callers that
    /// must account for the other one read it by id beforehand.
    async fn add_registration(&self, client: Client) -> Result<Option<Client>>;

    /// Apply a delta; `None` when the registration id is unknown.
    async fn update_registration(&self, update: &ClientUpdate) -> Result<Option<Client>>;

    /// Remove a registration; `None` when nothing was stored under the id.
    async fn remove_registration(&self, id: &RegistrationId) -> Result<Option<Client>>;

    /// Look up by registration id
    async fn get_registration(&self, id: &RegistrationId) -> Result<Option<Client>>;

    /// Look up by endpoint name
    async fn get_registration_by_endpoint(&self, endpoint: &str) -> Result<Option<Client>>;

    /// Snapshot of every stored registration
    async fn get_all_registrations(&self) -> Result<Vec<Client>>;
}

#[async_trait]
impl<T: RegistrationStore + ?Sized> RegistrationStore for Arc<T> {
    async fn add_registration(&self, client: Client) -> Result<Option<Client>> {
        (**self).add_registration(client).await
    }

    async fn update_registration(&self, update: &ClientUpdate) -> Result<Option<Client>> {
        (**self).update_registration(update).await
    }

    async fn remove_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        (**self).remove_registration(id).await
    }

    async fn get_registration(&self, id: &RegistrationId) -> Result<Option<Client>> {
        (**self).get_registration(id).await
    }

    async fn get_registration_by_endpoint(&self, endpoint: &str) -> Result<Option<Client>> {
        (**self).get_registration_by_endpoint(endpoint).await
    }

    async fn get_all_registrations(&self) -> Result<Vec<Client>> {
        (**self).get_all_registrations().await
    }
}
