//! Registry events as owned values for async subscribers.
//!
//! [`EventBroadcaster`] is a listener that republishes every lifecycle
//! callback onto a `tokio::sync::broadcast` channel. Slow receivers lag and
//! lose events; the in-line listener protocol is unaffected.

use tether_core::{Client, ClientRegistryListener, ClientUpdate, RegistrationId};
use tokio::sync::broadcast;

/// One registration lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A new registration was stored
    Registered(Client),
    /// A registration was refreshed
    Updated {
        /// The delta that was applied
        update: ClientUpdate,
        /// State after the update
        client: Client,
    },
    /// A registration was removed, displaced or expired
    Unregistered(Client),
}

impl RegistryEvent {
    /// The client the event is about
    pub fn client(&self) -> &Client {
        match self {
            Self::Registered(client) | Self::Unregistered(client) => client,
            Self::Updated { client, .. } => client,
        }
    }

    /// Registration id of the client the event is about
    pub fn registration_id(&self) -> &RegistrationId {
        &self.client().registration_id
    }
}

/// Listener forwarding events into a broadcast channel
#[derive(Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<RegistryEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver observing events sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: RegistryEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl ClientRegistryListener for EventBroadcaster {
    fn registered(&self, client: &Client) {
        self.publish(RegistryEvent::Registered(client.clone()));
    }

    fn updated(&self, update: &ClientUpdate, client: &Client) {
        self.publish(RegistryEvent::Updated {
            update: update.clone(),
            client: client.clone(),
        });
    }

    fn unregistered(&self, client: &Client) {
        self.publish(RegistryEvent::Unregistered(client.clone()));
    }
}
