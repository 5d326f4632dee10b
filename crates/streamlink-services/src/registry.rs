//! Peer registry: folds discovery events into the set of reachable peers.
//!
//! Records exist only for resolved names: an `Appeared` event triggers a
//! resolution request and nothing else. Repeated resolutions overwrite in
//! place (last write wins), so duplicated or reordered transport traffic
//! converges on one record per name.
//!
//! Observers subscribe to a broadcast of `PeerChange`s. Changes are sent
//! while the write lock is held, so observers see them in the same order
//! the map was mutated.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use streamlink_core::{DiscoveryEvent, PeerRecord};

use crate::transport::Transport;

/// Capacity of the change broadcast. Slow observers see `Lagged` and should
/// resync from `snapshot()`.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum PeerChange {
    Added(PeerRecord),
    Updated(PeerRecord),
    Removed(String),
}

struct Slot {
    /// Insertion order; keeps `snapshot()` stable across refreshes.
    order: u64,
    record: PeerRecord,
}

#[derive(Default)]
struct Peers {
    by_name: HashMap<String, Slot>,
    next_order: u64,
}

/// Thread-safe registry of discovered peers, keyed by instance name.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<Peers>>,
    changes: broadcast::Sender<PeerChange>,
    resolver: Arc<dyn Transport>,
    service_type: Arc<str>,
    local_name: Option<Arc<str>>,
}

impl PeerRegistry {
    pub fn new(resolver: Arc<dyn Transport>, service_type: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            peers: Arc::new(RwLock::new(Peers::default())),
            changes,
            resolver,
            service_type: Arc::from(service_type.into()),
            local_name: None,
        }
    }

    /// Ignore events about this host's own announcement.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(Arc::from(name.into()));
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Receive add/update/remove notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerChange> {
        self.changes.subscribe()
    }

    /// Dispatch one transport event.
    pub fn handle(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Appeared { name } => self.on_peer_appeared(&name),
            DiscoveryEvent::Resolved {
                name,
                address,
                port,
                attributes,
            } => self.on_peer_resolved(&name, &address, port, attributes),
            DiscoveryEvent::Removed { name } => self.on_peer_removed(&name),
        }
    }

    /// A name was announced; ask the transport to resolve it.
    pub fn on_peer_appeared(&self, name: &str) {
        if !self.accepts(name, "appeared") {
            return;
        }
        tracing::debug!(peer = name, "peer appeared, requesting resolution");
        self.resolver.request_resolution(&self.service_type, name);
    }

    /// Full details for `name` arrived. Inserts or overwrites its record.
    pub fn on_peer_resolved(
        &self,
        name: &str,
        address: &str,
        port: u16,
        attributes: BTreeMap<String, String>,
    ) {
        if !self.accepts(name, "resolved") {
            return;
        }
        let address: IpAddr = match address.trim().parse() {
            Ok(a) => a,
            Err(_) => {
                tracing::warn!(peer = name, address, "dropping resolved event with unusable address");
                return;
            }
        };

        let mut guard = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let peers = &mut *guard;
        match peers.by_name.get_mut(name) {
            Some(slot) => {
                slot.record.refresh(address, port, attributes);
                tracing::debug!(peer = name, %address, port, "peer updated");
                let _ = self.changes.send(PeerChange::Updated(slot.record.clone()));
            }
            None => {
                let record = PeerRecord::resolved(name, address, port, attributes);
                tracing::info!(
                    peer = name,
                    %address,
                    port,
                    username = record.username(),
                    status = %record.status,
                    "peer discovered"
                );
                let _ = self.changes.send(PeerChange::Added(record.clone()));
                peers.by_name.insert(
                    name.to_string(),
                    Slot {
                        order: peers.next_order,
                        record,
                    },
                );
                peers.next_order += 1;
            }
        }
    }

    /// `name` is gone. No-op if it was never resolved.
    pub fn on_peer_removed(&self, name: &str) {
        if !self.accepts(name, "removed") {
            return;
        }
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.by_name.remove(name).is_some() {
            tracing::info!(peer = name, "peer left");
            let _ = self.changes.send(PeerChange::Removed(name.to_string()));
        } else {
            tracing::trace!(peer = name, "removal for unknown peer");
        }
    }

    /// Point-in-time copy of every record, in discovery order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut slots: Vec<&Slot> = peers.by_name.values().collect();
        slots.sort_by_key(|s| s.order);
        slots.into_iter().map(|s| s.record.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<PeerRecord> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(name)
            .map(|s| s.record.clone())
    }

    pub fn len(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject malformed events and our own announcement.
    fn accepts(&self, name: &str, kind: &'static str) -> bool {
        if name.trim().is_empty() {
            tracing::warn!(kind, "dropping discovery event with empty name");
            return false;
        }
        if self.local_name.as_deref() == Some(name) {
            tracing::trace!(kind, peer = name, "ignoring own announcement");
            return false;
        }
        true
    }
}
