//! Ordered listener set with snapshot dispatch.
//!
//! The subscriber list is an immutable `Vec` behind [`ArcSwap`]. Dispatch
//! loads the current snapshot once and iterates it without holding any lock,
//! so listeners may be added or removed from any thread, including from
//! inside a callback. A listener added mid-dispatch sees the next event; a
//! removed one stops receiving events from the next dispatch on.
//!
//! A panicking listener is logged and skipped; later listeners in the same
//! round still run.

use arc_swap::ArcSwap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tether_core::{Client, ClientRegistryListener, ClientUpdate};

type Snapshot = Vec<Arc<dyn ClientRegistryListener>>;

/// Listeners in registration order
pub struct ListenerSet {
    listeners: ArcSwap<Snapshot>,
}

impl ListenerSet {
    /// Empty set
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a listener
    pub fn add(&self, listener: Arc<dyn ClientRegistryListener>) {
        self.listeners.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    /// Remove the first entry that is the same `Arc` as `listener`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, listener: &Arc<dyn ClientRegistryListener>) -> bool {
        let mut removed = false;
        self.listeners.rcu(|current| {
            let mut next = Snapshot::clone(current);
            removed = match next.iter().position(|l| Arc::ptr_eq(l, listener)) {
                Some(index) => {
                    next.remove(index);
                    true
                }
                None => false,
            };
            next
        });
        removed
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.load().is_empty()
    }

    /// Current subscriber list
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.listeners.load_full()
    }

    /// Notify every listener of a new registration
    pub fn notify_registered(&self, client: &Client) {
        self.dispatch("registered", |l| l.registered(client));
    }

    /// Notify every listener of a refreshed registration
    pub fn notify_updated(&self, update: &ClientUpdate, client: &Client) {
        self.dispatch("updated", |l| l.updated(update, client));
    }

    /// Notify every listener of a removed registration
    pub fn notify_unregistered(&self, client: &Client) {
        self.dispatch("unregistered", |l| l.unregistered(client));
    }

    fn dispatch<F>(&self, event: &'static str, f: F)
    where
        F: Fn(&dyn ClientRegistryListener),
    {
        let snapshot = self.listeners.load_full();
        for (index, listener) in snapshot.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                tracing::error!(event, listener_index = index, "Registry listener panicked");
            }
        }
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use tether_core::RegistrationId;

    #[derive(Default)]
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ClientRegistryListener for Tagged {
        fn registered(&self, client: &Client) {
            self.log.lock().push(format!("{}:reg:{}", self.tag, client.endpoint));
        }
        fn updated(&self, _update: &ClientUpdate, client: &Client) {
            self.log.lock().push(format!("{}:upd:{}", self.tag, client.endpoint));
        }
        fn unregistered(&self, client: &Client) {
            self.log.lock().push(format!("{}:unreg:{}", self.tag, client.endpoint));
        }
    }

    struct Panicky;

    impl ClientRegistryListener for Panicky {
        fn registered(&self, _client: &Client) {
            panic!("listener failure");
        }
        fn updated(&self, _update: &ClientUpdate, _client: &Client) {}
        fn unregistered(&self, _client: &Client) {}
    }

    fn client() -> Client {
        Client::builder(
            RegistrationId::new("r1"),
            "ep",
            SocketAddr::from(([127, 0, 0, 1], 5683)),
        )
        .build()
        .expect("valid client")
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        set.add(Arc::new(Tagged { tag: "a", log: log.clone() }));
        set.add(Arc::new(Tagged { tag: "b", log: log.clone() }));

        set.notify_registered(&client());
        assert_eq!(*log.lock(), vec!["a:reg:ep", "b:reg:ep"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        let a: Arc<dyn ClientRegistryListener> = Arc::new(Tagged { tag: "a", log: log.clone() });
        let b: Arc<dyn ClientRegistryListener> = Arc::new(Tagged { tag: "b", log: log.clone() });
        set.add(a.clone());
        set.add(b.clone());

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);

        set.notify_unregistered(&client());
        assert_eq!(*log.lock(), vec!["b:unreg:ep"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        set.add(Arc::new(Panicky));
        set.add(Arc::new(Tagged { tag: "after", log: log.clone() }));

        set.notify_registered(&client());
        assert_eq!(*log.lock(), vec!["after:reg:ep"]);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_changes() {
        let set = ListenerSet::new();
        set.add(Arc::new(Tagged::default()));
        let snapshot = set.snapshot();
        set.add(Arc::new(Tagged::default()));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.len(), 2);
    }
}
