//! Transport seam: the local-network presence protocol underneath the engine.
//!
//! Implementations publish and retract service records, list what is
//! currently visible, and push discovery events onto per-subscription
//! channels. Callbacks arrive on transport-owned threads, so everything
//! here is `Send + Sync`.

pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use streamlink_core::{DiscoveryEvent, ServiceDescriptor, TransportError};

/// Handle identifying one discovery subscription.
pub type SubscriptionId = u64;

/// A live discovery subscription. Events stop when the transport drops its
/// sender, which happens on `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<DiscoveryEvent>,
}

pub trait Transport: Send + Sync {
    /// Announce a service record.
    fn publish(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError>;

    /// Withdraw a previously published record.
    fn retract(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError>;

    /// Instance names currently visible for `service_type`.
    fn list_active(&self, service_type: &str) -> Result<Vec<String>, TransportError>;

    /// Start receiving discovery events for `service_type`.
    fn subscribe(&self, service_type: &str) -> Result<Subscription, TransportError>;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Ask for full details of `name`. The answer, if any, arrives later as
    /// a `Resolved` event.
    fn request_resolution(&self, service_type: &str, name: &str);
}

// ── Subscriber fan-out ────────────────────────────────────────────────────────

/// Subscriber bookkeeping shared by transport implementations.
#[derive(Default)]
pub struct SubscriberSet {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, (String, mpsc::UnboundedSender<DiscoveryEvent>)>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, service_type: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, (service_type.to_string(), tx));
        Subscription { id, events: rx }
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriber count for one service type.
    pub fn count_for(&self, service_type: &str) -> usize {
        self.subscribers
            .iter()
            .filter(|e| e.value().0 == service_type)
            .count()
    }

    /// Deliver `event` to every subscriber of `service_type`. Subscribers
    /// whose receiver is gone are pruned.
    pub fn broadcast(&self, service_type: &str, event: &DiscoveryEvent) {
        self.subscribers.retain(|id, entry| {
            if entry.0 != service_type {
                return true;
            }
            match entry.1.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(subscription = *id, "pruning closed subscriber");
                    false
                }
            }
        });
    }
}
