//! streamlink-core: shared types for presence announcement and discovery.
//! All other Streamlink crates depend on this one.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod peer;

pub use descriptor::ServiceDescriptor;
pub use error::TransportError;
pub use event::DiscoveryEvent;
pub use peer::{PeerRecord, PeerStatus};
