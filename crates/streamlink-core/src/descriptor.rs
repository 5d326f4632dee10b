//! Service descriptor: the record this instance announces on the local link.
//!
//! A descriptor is immutable once built. Changing attributes means building
//! a new descriptor and registering it again.

use std::collections::BTreeMap;

use crate::config::StreamlinkConfig;

/// Service type identifying the Streamlink protocol.
pub const SERVICE_TYPE: &str = "_streamapp._tcp.local.";

/// Port announced when the config does not override it.
pub const DEFAULT_PORT: u16 = 8080;

/// Attribute key for the announcing user's display name.
pub const ATTR_USERNAME: &str = "username";
/// Attribute key for the user's presence status.
pub const ATTR_STATUS: &str = "status";
/// Attribute key for the application version.
pub const ATTR_VERSION: &str = "version";
/// Attribute key for free-text role.
pub const ATTR_ROLE: &str = "role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    service_type: String,
    instance_name: String,
    port: u16,
    attributes: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn new(service_type: impl Into<String>, instance_name: impl Into<String>, port: u16) -> Self {
        Self {
            service_type: service_type.into(),
            instance_name: instance_name.into(),
            port,
            attributes: BTreeMap::new(),
        }
    }

    /// Add or replace one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Build the descriptor for this host from the loaded config.
    ///
    /// Empty profile fields are left out of the attribute map.
    pub fn from_config(config: &StreamlinkConfig, instance_name: impl Into<String>) -> Self {
        let profile = &config.profile;
        let mut descriptor = Self::new(&config.network.service_type, instance_name, config.network.port);
        for (key, value) in [
            (ATTR_USERNAME, &profile.username),
            (ATTR_STATUS, &profile.status),
            (ATTR_VERSION, &profile.version),
            (ATTR_ROLE, &profile.role),
        ] {
            if !value.is_empty() {
                descriptor = descriptor.with_attribute(key, value.as_str());
            }
        }
        descriptor
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Fully qualified record name, `<instance>.<service type>`.
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.instance_name, self.service_type)
    }
}
