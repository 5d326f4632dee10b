//! Peer record: local cached view of one remote instance.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::descriptor::{ATTR_STATUS, ATTR_USERNAME, ATTR_VERSION};

/// Presence status a peer advertises in its `status` attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Online,
    #[default]
    Offline,
    Streaming,
    Busy,
}

impl PeerStatus {
    /// Status for a freshly resolved peer: the advertised value if it parses,
    /// otherwise Online.
    pub fn from_attributes(attributes: &BTreeMap<String, String>) -> Self {
        attributes
            .get(ATTR_STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(PeerStatus::Online)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Online => "online",
            PeerStatus::Offline => "offline",
            PeerStatus::Streaming => "streaming",
            PeerStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown peer status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PeerStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(PeerStatus::Online),
            "offline" => Ok(PeerStatus::Offline),
            "streaming" => Ok(PeerStatus::Streaming),
            "busy" => Ok(PeerStatus::Busy),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A remote instance currently believed reachable.
///
/// At most one record exists per `name`. Records are created on the first
/// resolution and refreshed in place by later ones.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// The remote's instance name. Registry key.
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    /// Attribute snapshot from the latest resolution.
    pub attributes: BTreeMap<String, String>,
    pub status: PeerStatus,
    /// First resolution of this name.
    pub discovered_at: Instant,
    /// Latest resolution of this name.
    pub last_seen: Instant,
}

impl PeerRecord {
    /// Build a record from a first resolution.
    pub fn resolved(
        name: impl Into<String>,
        address: IpAddr,
        port: u16,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            address,
            port,
            status: PeerStatus::from_attributes(&attributes),
            attributes,
            discovered_at: now,
            last_seen: now,
        }
    }

    /// Overwrite everything but identity and discovery time.
    pub fn refresh(&mut self, address: IpAddr, port: u16, attributes: BTreeMap<String, String>) {
        self.address = address;
        self.port = port;
        self.status = PeerStatus::from_attributes(&attributes);
        self.attributes = attributes;
        self.last_seen = Instant::now();
    }

    pub fn username(&self) -> &str {
        self.attr_or_unknown(ATTR_USERNAME)
    }

    pub fn version(&self) -> &str {
        self.attr_or_unknown(ATTR_VERSION)
    }

    fn attr_or_unknown(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("Unknown")
    }
}
