//! Tether Registry - client registry service
//!
//! Orchestrates the lifecycle of device registrations on top of a
//! [`RegistrationStore`](tether_core::RegistrationStore):
//!
//! - CRUD against the store with per-registration serialization
//! - In-line, ordered notification of [`ClientRegistryListener`](tether_core::ClientRegistryListener)s
//! - A background cleaner evicting registrations whose lease ran out
//! - Optional broadcast of [`RegistryEvent`]s for async subscribers
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = Arc::new(InMemoryRegistrationStore::new());
//! let registry = ClientRegistry::builder(store)
//!     .config(RegistryConfig::default())
//!     .build()?;
//! registry.start().await?;
//!
//! registry.register_client(client).await?;
//! let events = registry.subscribe();
//!
//! registry.stop().await?;
//! ```

#![forbid(unsafe_code)]

/// Background expiry sweep
pub mod cleaner;

/// Registry configuration
pub mod config;

/// Owned registry events and broadcasting
pub mod events;

/// Listener set with snapshot dispatch
pub mod listeners;

/// Per-key async locks
pub mod locks;

/// The registry service
pub mod registry;

/// Runtime service lifecycle
pub mod service;

pub use cleaner::{CleanerStatus, RegistrationCleaner, Sweep, SweepReport};
pub use config::RegistryConfig;
pub use events::{EventBroadcaster, RegistryEvent};
pub use listeners::ListenerSet;
pub use locks::{KeyGuard, KeyedLocks};
pub use registry::{ClientRegistry, ClientRegistryBuilder};
pub use service::{RuntimeService, ServiceError, ServiceErrorKind, ServiceHealth};
