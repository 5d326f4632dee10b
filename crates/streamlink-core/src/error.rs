//! Transport error taxonomy.
//!
//! Every variant is a transient, recoverable condition. The engine catches
//! these at the boundary of each operation and turns them into return
//! values or log lines.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("failed to publish {name}: {reason}")]
    Publish { name: String, reason: String },
    #[error("failed to retract {name}: {reason}")]
    Retract { name: String, reason: String },
    #[error("failed to list {service_type}: {reason}")]
    Query { service_type: String, reason: String },
    #[error("failed to subscribe to {service_type}: {reason}")]
    Subscribe { service_type: String, reason: String },
    #[error("transport closed")]
    Closed,
}
