//! Store behaviour observed through the `RegistrationStore` trait object.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Client, ClientUpdate, InMemoryRegistrationStore, RegistrationId, RegistrationStore,
    SimulatedClock,
};

fn client(id: &str, endpoint: &str) -> Client {
    Client::builder(
        RegistrationId::new(id),
        endpoint,
        SocketAddr::from(([192, 168, 1, 20], 56830)),
    )
    .lifetime(Duration::from_secs(300))
    .registered_at(1_000)
    .build()
    .expect("valid client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_keep_one_record_per_endpoint() {
    let store: Arc<dyn RegistrationStore> = Arc::new(InMemoryRegistrationStore::new());

    let mut tasks = Vec::new();
    for i in 0..64 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .add_registration(client(&format!("r{i}"), &format!("ep{}", i % 4)))
                .await
        }));
    }
    let mut displaced = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_some() {
            displaced += 1;
        }
    }

    let all = store.get_all_registrations().await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(displaced, 60);
    for record in all {
        let by_endpoint = store
            .get_registration_by_endpoint(&record.endpoint)
            .await
            .unwrap();
        assert_eq!(by_endpoint, Some(record));
    }
}

#[tokio::test]
async fn test_update_keeps_identity_and_merges_attributes() {
    let clock = SimulatedClock::new(1_000);
    let store = InMemoryRegistrationStore::with_clock(Arc::new(clock.clone()));
    let original = Client::builder(
        RegistrationId::new("r1"),
        "meter-7",
        SocketAddr::from(([192, 168, 1, 20], 56830)),
    )
    .registered_at(1_000)
    .attribute("fw", "1.0")
    .attribute("site", "north")
    .build()
    .unwrap();
    store.add_registration(original.clone()).await.unwrap();

    clock.advance(Duration::from_secs(10));
    let new_addr = SocketAddr::from(([192, 168, 1, 21], 40000));
    let update = ClientUpdate::new(RegistrationId::new("r1"))
        .with_address(new_addr)
        .with_attribute("fw", "1.1");
    let updated = store.update_registration(&update).await.unwrap().unwrap();

    assert_eq!(updated.registration_id, original.registration_id);
    assert_eq!(updated.endpoint, original.endpoint);
    assert_eq!(updated.registration_date_ms, 1_000);
    assert_eq!(updated.last_update_ms, 11_000);
    assert_eq!(updated.address, new_addr);
    assert_eq!(updated.additional_attributes.get("fw").map(String::as_str), Some("1.1"));
    assert_eq!(updated.additional_attributes.get("site").map(String::as_str), Some("north"));
}
