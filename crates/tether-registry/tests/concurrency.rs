//! Interleavings of updates, sweeps, registrations and listener churn.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Client, ClientRegistryListener, ClientUpdate};
use tether_registry::ClientRegistry;
use tether_testkit::{
    test_registration_id, test_update, ClientFixture, RecordingListener, StoreFault, TestRegistry,
    FIXTURE_LIFETIME,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_update_holding_record_blocks_stale_expiry() {
    let harness = TestRegistry::manual();
    let listener = harness.recording_listener();
    harness
        .registry
        .register_client(ClientFixture::new(1).at(harness.now_ms()).build())
        .await
        .unwrap();
    harness.advance(FIXTURE_LIFETIME + Duration::from_secs(1));

    // The update stalls inside the store while holding the record; the sweep
    // snapshot still shows the expired lease.
    harness
        .store
        .inject(test_registration_id(1), StoreFault::Delay(Duration::from_millis(100)));
    let update = {
        let registry = harness.registry.clone();
        tokio::spawn(async move { registry.update_client(test_update(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.store.heal(&test_registration_id(1));

    let report = harness.registry.run_sweep().await;
    let updated = update.await.unwrap().unwrap();

    assert!(updated.is_some());
    assert_eq!(report.expired, 0);
    assert_eq!(listener.unregistered_count(), 0);
    assert!(harness.registry.get("device-1").await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_update_and_sweep_never_remove_refreshed_client() {
    let harness = TestRegistry::manual();

    for round in 0..100u32 {
        let client = ClientFixture::new(round).at(harness.now_ms()).build();
        harness.registry.register_client(client).await.unwrap();
        harness.advance(FIXTURE_LIFETIME);

        let updater = {
            let registry = harness.registry.clone();
            tokio::spawn(async move { registry.update_client(test_update(round)).await })
        };
        let sweeper = {
            let registry = harness.registry.clone();
            tokio::spawn(async move { registry.run_sweep().await })
        };
        let updated = updater.await.unwrap().unwrap();
        sweeper.await.unwrap();

        let present = harness
            .registry
            .find_by_registration_id(&test_registration_id(round))
            .await
            .unwrap();
        // Either the sweep won (update saw nothing) or the refresh survived.
        assert_eq!(updated.is_some(), present.is_some(), "round {round}");

        if present.is_some() {
            harness
                .registry
                .deregister_client(&test_registration_id(round))
                .await
                .unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_on_one_endpoint_leave_one_owner() {
    let harness = TestRegistry::manual();
    let listener = harness.recording_listener();
    let now = harness.now_ms();

    let mut tasks = Vec::new();
    for seed in 1..=16 {
        let registry = harness.registry.clone();
        let client = ClientFixture::new(seed).endpoint("contested").at(now).build();
        tasks.push(tokio::spawn(async move { registry.register_client(client).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let clients = harness.registry.all_clients().await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(listener.registered_count(), 16);
    assert_eq!(listener.unregistered_count(), 15);

    // Each displacement is announced before the registration that caused it.
    let labels = listener.labels();
    assert!(labels[0].starts_with("registered:"));
    for pair in labels[1..].chunks(2) {
        assert!(pair[0].starts_with("unregistered:"));
        assert!(pair[1].starts_with("registered:"));
    }
    let owner = harness.registry.get("contested").await.unwrap().unwrap();
    assert_eq!(labels.last().unwrap(), &format!("registered:{}", owner.registration_id));
}

/// Adds and removes listeners from inside its own callback, once.
struct Churner {
    registry: ClientRegistry,
    victim: Arc<dyn ClientRegistryListener>,
    added: Arc<RecordingListener>,
    fired: AtomicBool,
}

impl ClientRegistryListener for Churner {
    fn registered(&self, _client: &Client) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.registry.remove_listener(&self.victim);
            self.registry.add_listener(self.added.clone());
        }
    }
    fn updated(&self, _update: &ClientUpdate, _client: &Client) {}
    fn unregistered(&self, _client: &Client) {}
}

#[tokio::test]
async fn test_listener_churn_inside_callback() {
    let harness = TestRegistry::manual();
    let victim = Arc::new(RecordingListener::new());
    let added = Arc::new(RecordingListener::new());
    let churner = Arc::new(Churner {
        registry: harness.registry.clone(),
        victim: victim.clone(),
        added: added.clone(),
        fired: AtomicBool::new(false),
    });
    harness.registry.add_listener(churner);
    harness.registry.add_listener(victim.clone());
    let bystander = harness.recording_listener();

    let now = harness.now_ms();
    harness
        .registry
        .register_client(ClientFixture::new(1).at(now).build())
        .await
        .unwrap();

    // In-flight round used the snapshot taken before the churn
    assert_eq!(bystander.labels(), vec!["registered:reg-1"]);
    assert_eq!(victim.labels(), vec!["registered:reg-1"]);
    assert_eq!(added.count(), 0);

    harness
        .registry
        .register_client(ClientFixture::new(2).at(now).build())
        .await
        .unwrap();

    assert_eq!(bystander.count(), 2);
    assert_eq!(victim.count(), 1);
    assert_eq!(added.labels(), vec!["registered:reg-2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_churn_under_load_keeps_bystander_exact() {
    let harness = TestRegistry::manual();
    let bystander = harness.recording_listener();
    let stop = Arc::new(AtomicBool::new(false));

    let churn = {
        let registry = harness.registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                let transient: Arc<dyn ClientRegistryListener> = Arc::new(RecordingListener::new());
                registry.add_listener(transient.clone());
                tokio::task::yield_now().await;
                assert!(registry.remove_listener(&transient));
            }
        })
    };

    let now = harness.now_ms();
    let mut tasks = Vec::new();
    for seed in 1..=200 {
        let registry = harness.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .register_client(ClientFixture::new(seed).at(now).build())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    churn.await.unwrap();

    assert_eq!(bystander.registered_count(), 200);
    assert_eq!(bystander.unregistered_count(), 0);
    assert_eq!(harness.registry.listener_count(), 1);
}

struct Panicky;

impl ClientRegistryListener for Panicky {
    fn registered(&self, _client: &Client) {
        panic!("listener bug");
    }
    fn updated(&self, _update: &ClientUpdate, _client: &Client) {}
    fn unregistered(&self, _client: &Client) {}
}

#[tokio::test]
async fn test_panicking_listener_does_not_fail_registration() {
    let harness = TestRegistry::manual();
    harness.registry.add_listener(Arc::new(Panicky));
    let after = harness.recording_listener();

    harness
        .registry
        .register_client(ClientFixture::new(1).at(harness.now_ms()).build())
        .await
        .unwrap();

    assert_eq!(after.registered_count(), 1);
    assert!(harness.registry.get("device-1").await.unwrap().is_some());
}
