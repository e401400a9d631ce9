//! Registry configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_core::{Result, TetherError};

/// Configuration for the client registry and its cleaner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Period between expiry sweeps (default: 2s)
    #[serde(rename = "cleanup_interval_ms", with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Delay before the first sweep after `start` (default: 2s)
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound on waiting for an in-flight sweep during `stop` (default: 5s)
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Extra time a registration survives past its lifetime (default: 0)
    #[serde(rename = "expiration_grace_ms", with = "duration_ms")]
    pub expiration_grace: Duration,

    /// Run the background cleaner on `start`
    pub auto_cleanup_enabled: bool,

    /// Buffer size of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(2),
            initial_delay: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
            expiration_grace: Duration::ZERO,
            auto_cleanup_enabled: true,
            event_channel_capacity: 256,
        }
    }
}

impl RegistryConfig {
    /// Create config for testing (shorter intervals)
    pub fn for_testing() -> Self {
        Self {
            cleanup_interval: Duration::from_millis(20),
            initial_delay: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Create config with the background cleaner disabled
    pub fn manual_only() -> Self {
        Self {
            auto_cleanup_enabled: false,
            ..Default::default()
        }
    }

    /// Set the sweep period
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the delay before the first sweep
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the bounded wait used by `stop`
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the expiration grace period
    pub fn with_expiration_grace(mut self, grace: Duration) -> Self {
        self.expiration_grace = grace;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval.is_zero() {
            return Err(TetherError::invalid("cleanup_interval must be greater than zero"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(TetherError::invalid("shutdown_timeout must be greater than zero"));
        }
        if self.event_channel_capacity == 0 {
            return Err(TetherError::invalid(
                "event_channel_capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TetherError::invalid(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TetherError::not_found(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
