//! streamlink-services: presence announcement, health monitoring, and
//! peer-set reconciliation on top of a pluggable transport.

pub mod discovery;
pub mod registration;
pub mod registry;
pub mod transport;

pub use discovery::DiscoveryCoordinator;
pub use registration::{RegistrationManager, RegistrationPolicy, RegistrationState};
pub use registry::{PeerChange, PeerRegistry};
pub use transport::memory::MemoryTransport;
pub use transport::{SubscriberSet, Subscription, SubscriptionId, Transport};
