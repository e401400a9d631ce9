//! Runtime service lifecycle
//!
//! Uniform start/stop/health surface the server's startup and shutdown
//! sequence drives. `ClientRegistry` implements it.

use async_trait::async_trait;
use std::fmt;
use tether_core::TetherError;

/// Health reported by a lifecycle-managed service.
///
/// For the registry: `Degraded` means the last expiry sweep lost individual
/// records, `Unhealthy` means it could not list the store at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHealth {
    /// Running, last sweep clean
    Healthy,
    /// Running with partial failures
    Degraded {
        /// What went wrong
        reason: String,
    },
    /// Running but unable to do its job
    Unhealthy {
        /// What went wrong
        reason: String,
    },
    /// Never started
    NotStarted,
    /// `start` in progress
    Starting,
    /// `stop` in progress
    Stopping,
    /// Stopped after running
    Stopped,
}

impl ServiceHealth {
    /// Only `Healthy`
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// `Healthy` or `Degraded`
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded { .. })
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded { reason } => write!(f, "degraded: {reason}"),
            Self::Unhealthy { reason } => write!(f, "unhealthy: {reason}"),
            Self::NotStarted => f.write_str("not started"),
            Self::Starting => f.write_str("starting"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Which lifecycle transition failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// `start` failed
    StartupFailed,
    /// `stop` failed
    ShutdownFailed,
}

/// Lifecycle failure of a named service
#[derive(Debug, thiserror::Error)]
#[error("[{service}] {kind:?}: {source}")]
pub struct ServiceError {
    /// Service that failed
    pub service: &'static str,
    /// Failed transition
    pub kind: ServiceErrorKind,
    /// Cause
    #[source]
    pub source: TetherError,
}

impl ServiceError {
    /// Failure of `start`
    pub fn startup_failed(service: &'static str, source: TetherError) -> Self {
        Self {
            service,
            kind: ServiceErrorKind::StartupFailed,
            source,
        }
    }

    /// Failure of `stop`
    pub fn shutdown_failed(service: &'static str, source: TetherError) -> Self {
        Self {
            service,
            kind: ServiceErrorKind::ShutdownFailed,
            source,
        }
    }
}

/// Service with a start/stop lifecycle and health reporting
#[async_trait]
pub trait RuntimeService: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Start; a no-op when already running
    async fn start(&self) -> Result<(), ServiceError>;

    /// Stop gracefully; a no-op when not running
    async fn stop(&self) -> Result<(), ServiceError>;

    /// Current health, without blocking
    fn health(&self) -> ServiceHealth;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_rendering() {
        assert_eq!(ServiceHealth::Healthy.to_string(), "healthy");
        let degraded = ServiceHealth::Degraded {
            reason: "2 failures in last expiry sweep".to_string(),
        };
        assert_eq!(degraded.to_string(), "degraded: 2 failures in last expiry sweep");
        assert_eq!(ServiceHealth::NotStarted.to_string(), "not started");
    }

    #[test]
    fn test_operational_states() {
        let degraded = ServiceHealth::Degraded {
            reason: "partial".to_string(),
        };
        assert!(!degraded.is_healthy());
        assert!(degraded.is_operational());
        assert!(!ServiceHealth::Unhealthy {
            reason: "store down".to_string()
        }
        .is_operational());
        assert!(!ServiceHealth::Starting.is_operational());
    }

    #[test]
    fn test_error_names_service_and_cause() {
        let err = ServiceError::startup_failed(
            "client_registry",
            TetherError::internal("expiry cleaner is Stopping, expected Stopped"),
        );
        assert_eq!(err.kind, ServiceErrorKind::StartupFailed);
        let rendered = err.to_string();
        assert!(rendered.starts_with("[client_registry] StartupFailed"));
        assert!(rendered.contains("expiry cleaner"));
    }
}
