//! Discovery events emitted by a transport.

use std::collections::BTreeMap;

/// One unit of discovery traffic for a service type.
///
/// Delivery is best-effort: events may be duplicated, and ordering across
/// distinct names is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A name exists on the network but has not been resolved yet.
    Appeared { name: String },
    /// Full details for a name. `address` is raw text from the transport and
    /// is validated by the consumer.
    Resolved {
        name: String,
        address: String,
        port: u16,
        attributes: BTreeMap<String, String>,
    },
    /// The name is no longer announced.
    Removed { name: String },
}

impl DiscoveryEvent {
    /// The instance name this event refers to.
    pub fn name(&self) -> &str {
        match self {
            DiscoveryEvent::Appeared { name }
            | DiscoveryEvent::Resolved { name, .. }
            | DiscoveryEvent::Removed { name } => name,
        }
    }
}
