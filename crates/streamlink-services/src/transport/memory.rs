//! In-process transport.
//!
//! Behaves like a single shared link: published records are visible to
//! `list_active`, announcements and retractions are echoed to subscribers,
//! and resolution requests for known records are answered. Failure hooks
//! let tests script publish errors, query errors, and silent loss.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use streamlink_core::{DiscoveryEvent, ServiceDescriptor, TransportError};

use super::{SubscriberSet, Subscription, SubscriptionId, Transport};

/// Address reported for records resolved through this transport.
pub const LOOPBACK_ADDR: &str = "127.0.0.1";

#[derive(Default)]
pub struct MemoryTransport {
    /// (service type, instance name) -> published descriptor.
    active: DashMap<(String, String), ServiceDescriptor>,
    subscribers: SubscriberSet,

    publish_calls: AtomicUsize,
    retract_calls: AtomicUsize,
    list_calls: AtomicUsize,
    resolution_requests: Mutex<Vec<String>>,

    fail_publishes: AtomicUsize,
    fail_all_publishes: AtomicBool,
    fail_lists: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Failure hooks ─────────────────────────────────────────────────────────

    /// Fail the next `n` publish calls, then succeed.
    pub fn fail_next_publishes(&self, n: usize) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Fail every publish call until switched off.
    pub fn fail_all_publishes(&self, fail: bool) {
        self.fail_all_publishes.store(fail, Ordering::SeqCst);
    }

    /// Fail every `list_active` call until switched off.
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Remove a record without telling anyone, as if the network forgot it.
    pub fn drop_announcement(&self, service_type: &str, name: &str) -> bool {
        self.active
            .remove(&(service_type.to_string(), name.to_string()))
            .is_some()
    }

    /// Inject a discovery event for every subscriber of `service_type`.
    pub fn emit(&self, service_type: &str, event: DiscoveryEvent) {
        self.subscribers.broadcast(service_type, &event);
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn retract_calls(&self) -> usize {
        self.retract_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Names passed to `request_resolution`, in call order.
    pub fn resolution_requests(&self) -> Vec<String> {
        self.resolution_requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn is_active(&self, service_type: &str, name: &str) -> bool {
        self.active
            .contains_key(&(service_type.to_string(), name.to_string()))
    }

    /// Live subscriptions for `service_type`.
    pub fn subscriber_count(&self, service_type: &str) -> usize {
        self.subscribers.count_for(service_type)
    }

    fn should_fail_publish(&self) -> bool {
        if self.fail_all_publishes.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_publish() {
            return Err(TransportError::Publish {
                name: descriptor.instance_name().to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let key = (
            descriptor.service_type().to_string(),
            descriptor.instance_name().to_string(),
        );
        self.active.insert(key, descriptor.clone());
        self.subscribers.broadcast(
            descriptor.service_type(),
            &DiscoveryEvent::Appeared {
                name: descriptor.instance_name().to_string(),
            },
        );
        Ok(())
    }

    fn retract(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError> {
        self.retract_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.drop_announcement(descriptor.service_type(), descriptor.instance_name());
        if removed {
            self.subscribers.broadcast(
                descriptor.service_type(),
                &DiscoveryEvent::Removed {
                    name: descriptor.instance_name().to_string(),
                },
            );
        }
        Ok(())
    }

    fn list_active(&self, service_type: &str) -> Result<Vec<String>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(TransportError::Query {
                service_type: service_type.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let mut names: Vec<String> = self
            .active
            .iter()
            .filter(|e| e.key().0 == service_type)
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn subscribe(&self, service_type: &str) -> Result<Subscription, TransportError> {
        Ok(self.subscribers.add(service_type))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }

    fn request_resolution(&self, service_type: &str, name: &str) {
        if let Ok(mut requests) = self.resolution_requests.lock() {
            requests.push(name.to_string());
        }

        let resolved = self
            .active
            .get(&(service_type.to_string(), name.to_string()))
            .map(|d| DiscoveryEvent::Resolved {
                name: d.instance_name().to_string(),
                address: LOOPBACK_ADDR.to_string(),
                port: d.port(),
                attributes: d.attributes().clone(),
            });

        if let Some(event) = resolved {
            self.subscribers.broadcast(service_type, &event);
        }
    }
}
