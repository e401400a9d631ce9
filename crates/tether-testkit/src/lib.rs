//! Tether Testing Infrastructure
//!
//! Common test setup for the registry crates: client fixtures, a listener
//! that records every event, a store that fails on demand, and a registry
//! wired to a simulated clock.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let harness = TestRegistry::manual();
//!     let listener = harness.recording_listener();
//!     harness.registry.register_client(ClientFixture::new(1).at(harness.now_ms()).build()).await?;
//!     assert_eq!(listener.registered_count(), 1);
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod listeners;
pub mod stores;

pub use fixtures::*;
pub use harness::*;
pub use listeners::*;
pub use stores::*;

/// Install a `tracing` subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
