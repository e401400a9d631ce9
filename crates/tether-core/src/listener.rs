//! Registration lifecycle listener

use crate::client::Client;
use crate::update::ClientUpdate;

/// Subscriber to registration lifecycle transitions.
///
/// Callbacks run in-line with the mutating registry call, after the store
/// has been changed and before the call returns. They must not block for
/// long and must not call back into the registry for the same registration.
pub trait ClientRegistryListener: Send + Sync {
    /// A new registration was stored
    fn registered(&self, client: &Client);

    /// An existing registration was refreshed; `client` is the new state
    fn updated(&self, update: &ClientUpdate, client: &Client);

    /// A registration was removed, displaced or expired
    fn unregistered(&self, client: &Client);
}
