//! Tether Core - client registry foundation
//!
//! This crate provides the data model and collaborator interfaces for the
//! Tether device registry. It contains no orchestration logic; the registry
//! service lives in `tether-registry`.
//!
//! # Contents
//!
//! - `Client`, `ClientUpdate`: registration record and partial update
//! - `RegistrationStore`: keyed persistence interface consumed by the registry
//! - `ClientRegistryListener`: lifecycle subscriber interface
//! - `PhysicalClock`: wall-clock source used for aliveness
//! - `InMemoryRegistrationStore`: reference store implementation

#![forbid(unsafe_code)]

/// Client record and builder
pub mod client;

/// Unified error handling
pub mod errors;

/// Registration identifiers
pub mod identifiers;

/// Lifecycle listener interface
pub mod listener;

/// In-memory store implementation
pub mod memory;

/// Store interface
pub mod store;

/// Clock abstraction
pub mod time;

/// Partial registration update
pub mod update;

pub use client::{BindingMode, Client, ClientBuilder, LinkObject, DEFAULT_LIFETIME};
pub use errors::{Result, TetherError};
pub use identifiers::RegistrationId;
pub use listener::ClientRegistryListener;
pub use memory::InMemoryRegistrationStore;
pub use store::RegistrationStore;
pub use time::{PhysicalClock, RealClock, SimulatedClock};
pub use update::ClientUpdate;
