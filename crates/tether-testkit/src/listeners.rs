//! Recording listener

use parking_lot::Mutex;
use tether_core::{Client, ClientRegistryListener, ClientUpdate, RegistrationId};

/// One observed callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// `registered(client)`
    Registered(Client),
    /// `updated(update, client)`
    Updated(ClientUpdate, Client),
    /// `unregistered(client)`
    Unregistered(Client),
}

impl RecordedEvent {
    /// Client the event refers to
    pub fn client(&self) -> &Client {
        match self {
            Self::Registered(client) | Self::Unregistered(client) | Self::Updated(_, client) => {
                client
            }
        }
    }

    /// Compact `kind:registration_id` form for ordering assertions
    pub fn label(&self) -> String {
        let kind = match self {
            Self::Registered(_) => "registered",
            Self::Updated(..) => "updated",
            Self::Unregistered(_) => "unregistered",
        };
        format!("{kind}:{}", self.client().registration_id)
    }
}

/// Listener that keeps every callback in arrival order
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Labels of all events so far, see [`RecordedEvent::label`]
    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(RecordedEvent::label).collect()
    }

    /// Total number of events
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Number of `registered` events
    pub fn registered_count(&self) -> usize {
        self.count_matching(|e| matches!(e, RecordedEvent::Registered(_)))
    }

    /// Number of `updated` events
    pub fn updated_count(&self) -> usize {
        self.count_matching(|e| matches!(e, RecordedEvent::Updated(..)))
    }

    /// Number of `unregistered` events
    pub fn unregistered_count(&self) -> usize {
        self.count_matching(|e| matches!(e, RecordedEvent::Unregistered(_)))
    }

    /// Ids reported as unregistered, in order
    pub fn unregistered_ids(&self) -> Vec<RegistrationId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Unregistered(client) => Some(client.registration_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn count_matching(&self, f: impl Fn(&RecordedEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| f(e)).count()
    }

    fn record(&self, event: RecordedEvent) {
        self.events.lock().push(event);
    }
}

impl ClientRegistryListener for RecordingListener {
    fn registered(&self, client: &Client) {
        self.record(RecordedEvent::Registered(client.clone()));
    }

    fn updated(&self, update: &ClientUpdate, client: &Client) {
        self.record(RecordedEvent::Updated(update.clone(), client.clone()));
    }

    fn unregistered(&self, client: &Client) {
        self.record(RecordedEvent::Unregistered(client.clone()));
    }
}
