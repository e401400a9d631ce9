//! Client record: the state of one registered device.
//!
//! # Invariants
//!
//! - `endpoint` and `registration_id` are non-empty
//! - `lifetime` is non-zero
//! - `last_update_ms >= registration_date_ms` for records built by this crate
//!
//! Aliveness is a pure function of the record and a clock reading; see
//! [`Client::is_alive_at`].

use crate::errors::{Result, TetherError};
use crate::identifiers::RegistrationId;
use crate::time::{PhysicalClock, RealClock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Registration lifetime used when the device does not send one.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(86_400);

/// Protocol version assumed when the device does not send one.
pub const DEFAULT_LWM2M_VERSION: &str = "1.0";

/// Transport binding requested by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BindingMode {
    /// UDP
    #[default]
    U,
    /// UDP with queue mode
    UQ,
    /// SMS
    S,
    /// SMS with queue mode
    SQ,
    /// UDP and SMS
    US,
    /// UDP with queue mode and SMS
    UQS,
}

impl BindingMode {
    /// Whether the device buffers downlink messages while asleep
    pub fn is_queue_mode(self) -> bool {
        matches!(self, Self::UQ | Self::SQ | Self::UQS)
    }
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::U => "U",
            Self::UQ => "UQ",
            Self::S => "S",
            Self::SQ => "SQ",
            Self::US => "US",
            Self::UQS => "UQS",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BindingMode {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "U" => Ok(Self::U),
            "UQ" => Ok(Self::UQ),
            "S" => Ok(Self::S),
            "SQ" => Ok(Self::SQ),
            "US" => Ok(Self::US),
            "UQS" => Ok(Self::UQS),
            other => Err(TetherError::invalid(format!("unknown binding mode: {other}"))),
        }
    }
}

/// One entry of the object list advertised by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkObject {
    /// Object or instance path, e.g. `/3/0`
    pub url: String,
    /// Link attributes such as `rt` or `ver`
    pub attributes: BTreeMap<String, String>,
}

impl LinkObject {
    /// Link without attributes
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// State of one registered device.
///
/// The store owns the canonical copy; values handed out by the registry are
/// snapshots and mutating them has no effect on the registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Identifier of this registration instance
    pub registration_id: RegistrationId,
    /// Device-chosen logical name, unique among live registrations
    pub endpoint: String,
    /// Source address of the device
    pub address: SocketAddr,
    /// Server-side address the registration arrived on
    pub registration_endpoint: Option<SocketAddr>,
    /// Registration time, unix milliseconds
    pub registration_date_ms: u64,
    /// Time of the last register or update, unix milliseconds
    pub last_update_ms: u64,
    /// Lease length; the registration expires this long after `last_update_ms`
    pub lifetime: Duration,
    /// Protocol version announced by the device
    pub lwm2m_version: String,
    /// Requested transport binding
    pub binding_mode: BindingMode,
    /// MSISDN for SMS bindings
    pub sms_number: Option<String>,
    /// Supported objects and instances
    pub object_links: Vec<LinkObject>,
    /// Root path of the device's object tree
    pub root_path: String,
    /// Registration attributes this crate does not interpret
    pub additional_attributes: BTreeMap<String, String>,
}

impl Client {
    /// Start building a client record.
    pub fn builder(
        registration_id: RegistrationId,
        endpoint: impl Into<String>,
        address: SocketAddr,
    ) -> ClientBuilder {
        ClientBuilder::new(registration_id, endpoint, address)
    }

    /// Unix millisecond instant at which the lease runs out (grace excluded)
    pub fn expiration_ms(&self) -> u64 {
        let lifetime_ms = u64::try_from(self.lifetime.as_millis()).unwrap_or(u64::MAX);
        self.last_update_ms.saturating_add(lifetime_ms)
    }

    /// Aliveness predicate: `now < last_update + lifetime + grace`.
    pub fn is_alive_at(&self, now_ms: u64, grace: Duration) -> bool {
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        now_ms < self.expiration_ms().saturating_add(grace_ms)
    }

    /// Reject records the registry must not accept.
    pub fn validate(&self) -> Result<()> {
        if self.registration_id.is_empty() {
            return Err(TetherError::invalid("registration id must not be empty"));
        }
        if self.endpoint.is_empty() {
            return Err(TetherError::invalid("endpoint must not be empty"));
        }
        if self.lifetime.is_zero() {
            return Err(TetherError::invalid(format!(
                "lifetime of {} must be greater than zero",
                self.endpoint
            )));
        }
        Ok(())
    }

    /// Whether the device advertised the given object path
    pub fn supports_object(&self, url: &str) -> bool {
        self.object_links.iter().any(|link| link.url == url)
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client[endpoint={}, registration_id={}, address={}, lifetime={}s, binding={}]",
            self.endpoint,
            self.registration_id,
            self.address,
            self.lifetime.as_secs(),
            self.binding_mode
        )
    }
}

/// Builder for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    client: Client,
}

impl ClientBuilder {
    fn new(registration_id: RegistrationId, endpoint: impl Into<String>, address: SocketAddr) -> Self {
        let now_ms = RealClock::new().now_ms();
        Self {
            client: Client {
                registration_id,
                endpoint: endpoint.into(),
                address,
                registration_endpoint: None,
                registration_date_ms: now_ms,
                last_update_ms: now_ms,
                lifetime: DEFAULT_LIFETIME,
                lwm2m_version: DEFAULT_LWM2M_VERSION.to_string(),
                binding_mode: BindingMode::default(),
                sms_number: None,
                object_links: Vec::new(),
                root_path: "/".to_string(),
                additional_attributes: BTreeMap::new(),
            },
        }
    }

    /// Stamp registration and last-update time; defaults to the system clock
    pub fn registered_at(mut self, now_ms: u64) -> Self {
        self.client.registration_date_ms = now_ms;
        self.client.last_update_ms = now_ms;
        self
    }

    /// Set the lease length
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.client.lifetime = lifetime;
        self
    }

    /// Set the server-side address the registration arrived on
    pub fn registration_endpoint(mut self, addr: SocketAddr) -> Self {
        self.client.registration_endpoint = Some(addr);
        self
    }

    /// Set the protocol version
    pub fn lwm2m_version(mut self, version: impl Into<String>) -> Self {
        self.client.lwm2m_version = version.into();
        self
    }

    /// Set the transport binding
    pub fn binding_mode(mut self, mode: BindingMode) -> Self {
        self.client.binding_mode = mode;
        self
    }

    /// Set the SMS number
    pub fn sms_number(mut self, number: impl Into<String>) -> Self {
        self.client.sms_number = Some(number.into());
        self
    }

    /// Set the advertised object links
    pub fn object_links(mut self, links: Vec<LinkObject>) -> Self {
        self.client.object_links = links;
        self
    }

    /// Set the object tree root path
    pub fn root_path(mut self, path: impl Into<String>) -> Self {
        self.client.root_path = path.into();
        self
    }

    /// Add an uninterpreted registration attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client.additional_attributes.insert(key.into(), value.into());
        self
    }

    /// Finish and validate
    pub fn build(self) -> Result<Client> {
        self.client.validate()?;
        Ok(self.client)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5683))
    }

    fn client(lifetime_s: u64, registered_at: u64) -> Client {
        Client::builder(RegistrationId::new("reg-1"), "sensor-1", addr())
            .lifetime(Duration::from_secs(lifetime_s))
            .registered_at(registered_at)
            .build()
            .expect("valid client")
    }

    #[test]
    fn test_builder_defaults() {
        let c = Client::builder(RegistrationId::new("r"), "ep", addr())
            .build()
            .expect("valid client");
        assert_eq!(c.lifetime, DEFAULT_LIFETIME);
        assert_eq!(c.lwm2m_version, "1.0");
        assert_eq!(c.binding_mode, BindingMode::U);
        assert_eq!(c.root_path, "/");
        assert!(c.object_links.is_empty());
    }

    #[test]
    fn test_builder_stamps_system_time() {
        let before = RealClock::new().now_ms();
        let c = Client::builder(RegistrationId::new("r"), "ep", addr())
            .build()
            .expect("valid client");
        let after = RealClock::new().now_ms();

        assert!(c.registration_date_ms >= before && c.registration_date_ms <= after);
        assert_eq!(c.last_update_ms, c.registration_date_ms);
        assert!(c.is_alive_at(after, Duration::ZERO));
    }

    #[test]
    fn test_builder_rejects_malformed() {
        assert!(Client::builder(RegistrationId::new(""), "ep", addr())
            .build()
            .is_err());
        assert!(Client::builder(RegistrationId::new("r"), "", addr())
            .build()
            .is_err());
        assert!(Client::builder(RegistrationId::new("r"), "ep", addr())
            .lifetime(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_alive_until_lifetime_elapses() {
        let c = client(60, 1_000);
        assert!(c.is_alive_at(1_000, Duration::ZERO));
        assert!(c.is_alive_at(60_999, Duration::ZERO));
        assert!(!c.is_alive_at(61_000, Duration::ZERO));
    }

    #[test]
    fn test_grace_extends_lease() {
        let c = client(60, 0);
        assert!(!c.is_alive_at(60_000, Duration::ZERO));
        assert!(c.is_alive_at(60_000, Duration::from_secs(15)));
        assert!(!c.is_alive_at(75_000, Duration::from_secs(15)));
    }

    #[test]
    fn test_binding_mode_round_trip_str() {
        for mode in [
            BindingMode::U,
            BindingMode::UQ,
            BindingMode::S,
            BindingMode::SQ,
            BindingMode::US,
            BindingMode::UQS,
        ] {
            let parsed: BindingMode = mode.to_string().parse().expect("known mode");
            assert_eq!(parsed, mode);
        }
        assert!("T".parse::<BindingMode>().is_err());
        assert!(BindingMode::UQ.is_queue_mode());
        assert!(!BindingMode::US.is_queue_mode());
    }

    #[test]
    fn test_supports_object() {
        let c = Client::builder(RegistrationId::new("r"), "ep", addr())
            .object_links(vec![LinkObject::new("/3/0"), LinkObject::new("/1/0").with_attribute("ver", "1.1")])
            .build()
            .expect("valid client");
        assert!(c.supports_object("/3/0"));
        assert!(!c.supports_object("/5/0"));
    }

    #[test]
    fn test_expiration_saturates() {
        let mut c = client(1, u64::MAX - 10);
        c.lifetime = Duration::from_secs(u64::MAX);
        assert_eq!(c.expiration_ms(), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_alive_iff_before_expiry(
            registered in 0u64..1_000_000_000,
            lifetime_s in 1u64..100_000,
            offset in 0u64..200_000_000,
        ) {
            let c = client(lifetime_s, registered);
            let now = registered + offset;
            prop_assert_eq!(c.is_alive_at(now, Duration::ZERO), offset < lifetime_s * 1000);
        }
    }
}
