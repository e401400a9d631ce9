//! Partial update of a registration

use crate::client::{BindingMode, Client, LinkObject};
use crate::errors::{Result, TetherError};
use crate::identifiers::RegistrationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Delta sent by a device to refresh its registration.
///
/// Only the fields a device may change without re-registering are present.
/// `None` means "unchanged".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Registration this update applies to
    pub registration_id: RegistrationId,
    /// New source address
    pub address: Option<SocketAddr>,
    /// New lease length
    pub lifetime: Option<Duration>,
    /// New SMS number
    pub sms_number: Option<String>,
    /// New transport binding
    pub binding_mode: Option<BindingMode>,
    /// Replacement object list
    pub object_links: Option<Vec<LinkObject>>,
    /// Attributes merged into the existing ones
    pub additional_attributes: BTreeMap<String, String>,
}

impl ClientUpdate {
    /// Update that only refreshes the lease
    pub fn new(registration_id: RegistrationId) -> Self {
        Self {
            registration_id,
            address: None,
            lifetime: None,
            sms_number: None,
            binding_mode: None,
            object_links: None,
            additional_attributes: BTreeMap::new(),
        }
    }

    /// Change the source address
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Change the lease length
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Change the SMS number
    pub fn with_sms_number(mut self, number: impl Into<String>) -> Self {
        self.sms_number = Some(number.into());
        self
    }

    /// Change the transport binding
    pub fn with_binding_mode(mut self, mode: BindingMode) -> Self {
        self.binding_mode = Some(mode);
        self
    }

    /// Replace the object list
    pub fn with_object_links(mut self, links: Vec<LinkObject>) -> Self {
        self.object_links = Some(links);
        self
    }

    /// Merge an uninterpreted attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_attributes.insert(key.into(), value.into());
        self
    }

    /// Reject malformed updates.
    pub fn validate(&self) -> Result<()> {
        if self.registration_id.is_empty() {
            return Err(TetherError::invalid("registration id must not be empty"));
        }
        if matches!(self.lifetime, Some(lifetime) if lifetime.is_zero()) {
            return Err(TetherError::invalid("lifetime must be greater than zero"));
        }
        Ok(())
    }

    /// Produce the refreshed record.
    ///
    /// Identity (`registration_id`, `endpoint`, `registration_date_ms`) is
    /// kept; `last_update_ms` becomes `now_ms`.
    pub fn apply(&self, client: &Client, now_ms: u64) -> Client {
        let mut updated = client.clone();
        if let Some(address) = self.address {
            updated.address = address;
        }
        if let Some(lifetime) = self.lifetime {
            updated.lifetime = lifetime;
        }
        if let Some(number) = &self.sms_number {
            updated.sms_number = Some(number.clone());
        }
        if let Some(mode) = self.binding_mode {
            updated.binding_mode = mode;
        }
        if let Some(links) = &self.object_links {
            updated.object_links = links.clone();
        }
        for (key, value) in &self.additional_attributes {
            updated.additional_attributes.insert(key.clone(), value.clone());
        }
        updated.last_update_ms = now_ms;
        updated
    }
}

impl fmt::Display for ClientUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientUpdate[registration_id={}", self.registration_id)?;
        if let Some(address) = self.address {
            write!(f, ", address={address}")?;
        }
        if let Some(lifetime) = self.lifetime {
            write!(f, ", lifetime={}s", lifetime.as_secs())?;
        }
        if let Some(mode) = self.binding_mode {
            write!(f, ", binding={mode}")?;
        }
        f.write_str("]")
    }
}
