//! Client registry service.
//!
//! `ClientRegistry` is the single entry point protocol handlers use to add,
//! refresh, look up and remove device registrations. Every mutation is
//! applied to the store and then announced to all listeners before the call
//! returns.
//!
//! # Locking
//!
//! - `endpoint_locks`: held by `register_client` for the endpoint being claimed
//! - `registration_locks`: held by update, deregister and the per-client
//!   expiry step for one registration id
//!
//! `register_client` acquires the endpoint lock first, then the ids of the
//! displaced and incoming records in ascending order. All other paths take a
//! single id lock, so no lock cycle can form.
//!
//! `start` and `stop` are serialized by `lifecycle`; a `start` issued while a
//! `stop` waits for an in-flight sweep runs after that stop completes.

use crate::cleaner::{RegistrationCleaner, Sweep, SweepReport};
use crate::config::RegistryConfig;
use crate::events::{EventBroadcaster, RegistryEvent};
use crate::listeners::ListenerSet;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::service::{RuntimeService, ServiceError, ServiceHealth};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tether_core::{
    Client, ClientRegistryListener, ClientUpdate, PhysicalClock, RealClock, RegistrationId,
    RegistrationStore, Result, TetherError,
};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

const SERVICE_NAME: &str = "client_registry";

struct RegistryInner {
    store: Arc<dyn RegistrationStore>,
    listeners: ListenerSet,
    registration_locks: KeyedLocks<RegistrationId>,
    endpoint_locks: KeyedLocks<String>,
    clock: Arc<dyn PhysicalClock>,
    config: RegistryConfig,
    cleaner: RegistrationCleaner,
    broadcaster: OnceLock<Arc<EventBroadcaster>>,
    lifecycle: AsyncMutex<()>,
    running: AtomicBool,
    ever_started: AtomicBool,
}

impl RegistryInner {
    /// Remove `id` from the store and announce it. Caller holds the id lock.
    async fn remove_and_notify(&self, id: &RegistrationId) -> Result<Option<Client>> {
        let removed = self.store.remove_registration(id).await?;
        if let Some(client) = &removed {
            self.listeners.notify_unregistered(client);
        }
        Ok(removed)
    }

    /// Re-read `id` under its lock and remove it if its lease has run out.
    async fn expire_if_dead(&self, id: &RegistrationId) -> Result<bool> {
        let _guard = self.registration_locks.lock(id).await;

        let Some(current) = self.store.get_registration(id).await? else {
            return Ok(false);
        };
        if current.is_alive_at(self.clock.now_ms(), self.config.expiration_grace) {
            return Ok(false);
        }

        let removed = self.remove_and_notify(id).await?;
        if let Some(client) = &removed {
            info!(
                endpoint = %client.endpoint,
                registration_id = %client.registration_id,
                expired_at_ms = client.expiration_ms(),
                "Registration expired"
            );
        }
        Ok(removed.is_some())
    }
}

#[async_trait]
impl Sweep for RegistryInner {
    async fn sweep(&self) -> SweepReport {
        let snapshot = match self.store.get_all_registrations().await {
            Ok(clients) => clients,
            Err(e) => {
                warn!(error = %e, "Failed to list registrations for expiry sweep");
                return SweepReport::failed();
            }
        };

        let mut report = SweepReport::default();
        let now_ms = self.clock.now_ms();
        for client in snapshot {
            report.evaluated += 1;
            if client.is_alive_at(now_ms, self.config.expiration_grace) {
                continue;
            }

            let id = &client.registration_id;
            match AssertUnwindSafe(self.expire_if_dead(id)).catch_unwind().await {
                Ok(Ok(true)) => report.expired += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    report.failures += 1;
                    warn!(
                        endpoint = %client.endpoint,
                        registration_id = %id,
                        error = %e,
                        "Failed to expire registration"
                    );
                }
                Err(_) => {
                    report.failures += 1;
                    warn!(
                        endpoint = %client.endpoint,
                        registration_id = %id,
                        "Panic while expiring registration"
                    );
                }
            }
        }

        if report.expired > 0 || report.failures > 0 {
            info!(
                evaluated = report.evaluated,
                expired = report.expired,
                failures = report.failures,
                "Expiry sweep finished"
            );
        } else {
            debug!(evaluated = report.evaluated, "Expiry sweep finished");
        }
        report
    }
}

/// Registry of connected devices.
///
/// Cheap to clone; all clones share the same store, listeners and cleaner.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl ClientRegistry {
    /// Registry with default configuration and the system clock
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self::from_parts(store, RegistryConfig::default(), Arc::new(RealClock::new()))
    }

    /// Start configuring a registry
    pub fn builder(store: Arc<dyn RegistrationStore>) -> ClientRegistryBuilder {
        ClientRegistryBuilder {
            store,
            config: RegistryConfig::default(),
            clock: None,
        }
    }

    fn from_parts(
        store: Arc<dyn RegistrationStore>,
        config: RegistryConfig,
        clock: Arc<dyn PhysicalClock>,
    ) -> Self {
        let cleaner = RegistrationCleaner::new(
            config.cleanup_interval,
            config.initial_delay,
            config.shutdown_timeout,
        );
        Self {
            inner: Arc::new(RegistryInner {
                store,
                listeners: ListenerSet::new(),
                registration_locks: KeyedLocks::new(),
                endpoint_locks: KeyedLocks::new(),
                clock,
                config,
                cleaner,
                broadcaster: OnceLock::new(),
                lifecycle: AsyncMutex::new(()),
                running: AtomicBool::new(false),
                ever_started: AtomicBool::new(false),
            }),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Snapshot of every registered client
    pub async fn all_clients(&self) -> Result<Vec<Client>> {
        self.inner.store.get_all_registrations().await
    }

    /// Client currently registered under `endpoint`
    pub async fn get(&self, endpoint: &str) -> Result<Option<Client>> {
        self.inner.store.get_registration_by_endpoint(endpoint).await
    }

    /// Client currently registered under `id`
    pub async fn find_by_registration_id(&self, id: &RegistrationId) -> Result<Option<Client>> {
        self.inner.store.get_registration(id).await
    }

    /// Store a new registration.
    ///
    /// A registration previously holding the same endpoint, and a previous
    /// registration under the same id, are replaced. Listeners see one
    /// `unregistered` per replaced record before `registered(client)`.
    pub async fn register_client(&self, client: Client) -> Result<()> {
        client.validate()?;
        let inner = &self.inner;

        let _endpoint_guard = inner.endpoint_locks.lock(&client.endpoint).await;
        let displaced_id = inner
            .store
            .get_registration_by_endpoint(&client.endpoint)
            .await?
            .map(|existing| existing.registration_id)
            .filter(|id| *id != client.registration_id);
        let _id_guards = self.lock_ids(displaced_id.as_ref(), &client.registration_id).await;

        // The store reports one displaced record; an earlier binding of this
        // id to another endpoint goes away in the same call.
        let earlier_binding = inner
            .store
            .get_registration(&client.registration_id)
            .await?
            .filter(|existing| existing.endpoint != client.endpoint);

        let previous = inner.store.add_registration(client.clone()).await?;
        let replaced = previous.into_iter().chain(earlier_binding);
        let mut announced: Vec<Client> = Vec::with_capacity(2);
        for old in replaced {
            if announced.contains(&old) {
                continue;
            }
            debug!(
                endpoint = %old.endpoint,
                registration_id = %old.registration_id,
                replaced_by = %client.registration_id,
                "Replacing existing registration"
            );
            inner.listeners.notify_unregistered(&old);
            announced.push(old);
        }

        debug!(
            endpoint = %client.endpoint,
            registration_id = %client.registration_id,
            address = %client.address,
            lifetime_s = client.lifetime.as_secs(),
            "Client registered"
        );
        inner.listeners.notify_registered(&client);
        Ok(())
    }

    async fn lock_ids(
        &self,
        displaced: Option<&RegistrationId>,
        incoming: &RegistrationId,
    ) -> Vec<KeyGuard<RegistrationId>> {
        let mut ids: Vec<&RegistrationId> = displaced.into_iter().chain([incoming]).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.inner.registration_locks.lock(id).await);
        }
        guards
    }

    /// Apply a registration update.
    ///
    /// Returns `Ok(None)` without notifying anyone when the id is unknown.
    pub async fn update_client(&self, update: ClientUpdate) -> Result<Option<Client>> {
        update.validate()?;
        let inner = &self.inner;
        let _guard = inner.registration_locks.lock(&update.registration_id).await;

        match inner.store.update_registration(&update).await? {
            Some(client) => {
                debug!(
                    endpoint = %client.endpoint,
                    registration_id = %client.registration_id,
                    "Client updated"
                );
                inner.listeners.notify_updated(&update, &client);
                Ok(Some(client))
            }
            None => {
                debug!(registration_id = %update.registration_id, "Update for unknown registration");
                Ok(None)
            }
        }
    }

    /// Remove a registration.
    ///
    /// Returns the removed client, or `Ok(None)` (and no notification) if
    /// nothing was registered under `id`.
    pub async fn deregister_client(&self, id: &RegistrationId) -> Result<Option<Client>> {
        if id.is_empty() {
            return Err(TetherError::invalid("registration id must not be empty"));
        }
        let _guard = self.inner.registration_locks.lock(id).await;

        let removed = self.inner.remove_and_notify(id).await?;
        match &removed {
            Some(client) => debug!(
                endpoint = %client.endpoint,
                registration_id = %id,
                "Client deregistered"
            ),
            None => debug!(registration_id = %id, "Deregistration of unknown registration"),
        }
        Ok(removed)
    }

    /// Subscribe a listener; it receives events dispatched after this call
    pub fn add_listener(&self, listener: Arc<dyn ClientRegistryListener>) {
        self.inner.listeners.add(listener);
    }

    /// Unsubscribe a listener previously passed to [`add_listener`](Self::add_listener)
    pub fn remove_listener(&self, listener: &Arc<dyn ClientRegistryListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Number of subscribed listeners, including the event broadcaster once installed
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Receive registry events as owned values.
    ///
    /// The first call installs a broadcasting listener; receivers only see
    /// events dispatched after they subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        let broadcaster = self.inner.broadcaster.get_or_init(|| {
            let broadcaster = Arc::new(EventBroadcaster::new(self.inner.config.event_channel_capacity));
            self.inner.listeners.add(broadcaster.clone());
            broadcaster
        });
        broadcaster.subscribe()
    }

    /// Whether `client` is alive now, per the registry clock and grace period
    pub fn is_alive(&self, client: &Client) -> bool {
        client.is_alive_at(self.inner.clock.now_ms(), self.inner.config.expiration_grace)
    }

    /// Run one expiry sweep immediately, independent of the background cleaner
    pub async fn run_sweep(&self) -> SweepReport {
        let report = self.inner.sweep().await;
        self.inner.cleaner.record_report(report);
        report
    }

    /// Result of the most recent sweep
    pub fn last_sweep(&self) -> Option<SweepReport> {
        self.inner.cleaner.last_report()
    }

    /// Start the registry; schedules the cleaner unless disabled in config.
    ///
    /// Starting a running registry is a no-op. A start issued during a
    /// `stop` waits for that stop to finish, then starts afresh.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.running.load(Ordering::SeqCst) {
            debug!("Client registry already started");
            return Ok(());
        }
        inner.ever_started.store(true, Ordering::SeqCst);

        if inner.config.auto_cleanup_enabled && !inner.cleaner.start(Arc::downgrade(inner)) {
            warn!(status = ?inner.cleaner.status(), "Expiry cleaner could not be scheduled");
            return Err(TetherError::internal(format!(
                "expiry cleaner is {:?}, expected Stopped",
                inner.cleaner.status()
            )));
        }
        inner.running.store(true, Ordering::SeqCst);
        info!(
            auto_cleanup = inner.config.auto_cleanup_enabled,
            "Client registry started"
        );
        Ok(())
    }

    /// Stop the registry, waiting (bounded) for an in-flight sweep.
    ///
    /// Stopping a stopped registry is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if !inner.running.load(Ordering::SeqCst) {
            debug!("Client registry not running");
            return Ok(());
        }

        inner.cleaner.stop().await;
        inner.running.store(false, Ordering::SeqCst);
        info!("Client registry stopped");
        Ok(())
    }

    /// Whether `start` has been called without a matching `stop`
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("listeners", &self.inner.listeners.len())
            .field("cleaner", &self.inner.cleaner)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeService for ClientRegistry {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self) -> std::result::Result<(), ServiceError> {
        ClientRegistry::start(self)
            .await
            .map_err(|e| ServiceError::startup_failed(SERVICE_NAME, e))
    }

    async fn stop(&self) -> std::result::Result<(), ServiceError> {
        ClientRegistry::stop(self)
            .await
            .map_err(|e| ServiceError::shutdown_failed(SERVICE_NAME, e))
    }

    fn health(&self) -> ServiceHealth {
        let inner = &self.inner;
        let running = inner.running.load(Ordering::SeqCst);
        if inner.lifecycle.try_lock().is_err() {
            return if running {
                ServiceHealth::Stopping
            } else {
                ServiceHealth::Starting
            };
        }
        if !inner.ever_started.load(Ordering::SeqCst) {
            return ServiceHealth::NotStarted;
        }
        if !running {
            return ServiceHealth::Stopped;
        }
        match inner.cleaner.last_report() {
            Some(report) if report.evaluated == 0 && report.failures > 0 => {
                ServiceHealth::Unhealthy {
                    reason: "store unavailable for expiry sweep".to_string(),
                }
            }
            Some(report) if report.failures > 0 => ServiceHealth::Degraded {
                reason: format!("{} failures in last expiry sweep", report.failures),
            },
            _ => ServiceHealth::Healthy,
        }
    }
}

/// Builder for [`ClientRegistry`]
pub struct ClientRegistryBuilder {
    store: Arc<dyn RegistrationStore>,
    config: RegistryConfig,
    clock: Option<Arc<dyn PhysicalClock>>,
}

impl ClientRegistryBuilder {
    /// Use the given configuration
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the given clock for aliveness checks
    pub fn clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the registry
    pub fn build(self) -> Result<ClientRegistry> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(RealClock::new()));
        Ok(ClientRegistry::from_parts(self.store, self.config, clock))
    }
}
