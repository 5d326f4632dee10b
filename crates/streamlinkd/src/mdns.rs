//! mDNS transport over `mdns-sd`.
//!
//! One browse runs per service type, started the first time the type is
//! published, listed, or subscribed. Its events are pumped on a dedicated
//! thread that keeps the visible-name cache behind `list_active` and fans
//! events out to subscribers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use dashmap::DashMap;
use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent, ServiceInfo};

use streamlink_core::{DiscoveryEvent, ServiceDescriptor, TransportError};
use streamlink_services::{SubscriberSet, Subscription, SubscriptionId, Transport};

#[derive(Default)]
struct BrowseState {
    subscribers: SubscriberSet,
    /// service type -> instance names currently answering.
    visible: DashMap<String, HashSet<String>>,
}

pub struct MdnsTransport {
    daemon: ServiceDaemon,
    /// Host name override. Empty = "<instance>.local.".
    host_name: String,
    state: Arc<BrowseState>,
    browsing: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MdnsTransport {
    pub fn new(host_name: impl Into<String>) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("failed to create mDNS daemon")?;
        Ok(Self {
            daemon,
            host_name: host_name.into(),
            state: Arc::new(BrowseState::default()),
            browsing: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Stop the mDNS daemon thread. Best-effort. Later calls fail with
    /// `TransportError::Closed`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.daemon.shutdown() {
            Ok(_) => tracing::info!("mDNS daemon stopped"),
            Err(e) => tracing::warn!(error = %e, "mDNS daemon shutdown failed"),
        }
    }

    fn host_name_for(&self, descriptor: &ServiceDescriptor) -> String {
        if self.host_name.is_empty() {
            format!("{}.local.", descriptor.instance_name())
        } else {
            self.host_name.clone()
        }
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn ensure_browse(&self, service_type: &str) -> Result<(), TransportError> {
        let mut browsing = self.browsing.lock().unwrap_or_else(PoisonError::into_inner);
        if browsing.contains(service_type) {
            return Ok(());
        }

        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| TransportError::Subscribe {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        let state = self.state.clone();
        let ty = service_type.to_string();
        std::thread::Builder::new()
            .name("mdns-browse".to_string())
            .spawn(move || pump(receiver, ty, state))
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        browsing.insert(service_type.to_string());
        tracing::debug!(service_type, "mDNS browse started");
        Ok(())
    }
}

impl Transport for MdnsTransport {
    fn publish(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError> {
        self.check_open()?;
        let publish_err = |reason: String| TransportError::Publish {
            name: descriptor.instance_name().to_string(),
            reason,
        };

        let properties: HashMap<String, String> = descriptor
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let info = ServiceInfo::new(
            descriptor.service_type(),
            descriptor.instance_name(),
            &self.host_name_for(descriptor),
            "",
            descriptor.port(),
            properties,
        )
        .map_err(|e| publish_err(e.to_string()))?
        .enable_addr_auto();

        self.daemon
            .register(info)
            .map_err(|e| publish_err(e.to_string()))?;

        // Warm the visibility cache so the health monitor has data.
        if let Err(e) = self.ensure_browse(descriptor.service_type()) {
            tracing::warn!(error = %e, "could not start browse after publish");
        }
        Ok(())
    }

    fn retract(&self, descriptor: &ServiceDescriptor) -> Result<(), TransportError> {
        self.check_open()?;
        self.daemon
            .unregister(&descriptor.fullname())
            .map(|_| ())
            .map_err(|e| TransportError::Retract {
                name: descriptor.instance_name().to_string(),
                reason: e.to_string(),
            })
    }

    fn list_active(&self, service_type: &str) -> Result<Vec<String>, TransportError> {
        self.check_open()?;
        self.ensure_browse(service_type).map_err(|e| TransportError::Query {
            service_type: service_type.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self
            .state
            .visible
            .get(service_type)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe(&self, service_type: &str) -> Result<Subscription, TransportError> {
        self.check_open()?;
        self.ensure_browse(service_type)?;
        Ok(self.state.subscribers.add(service_type))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.subscribers.remove(id);
    }

    fn request_resolution(&self, service_type: &str, name: &str) {
        // mdns-sd resolves every instance it finds while browsing.
        tracing::trace!(service_type, peer = name, "resolution handled by mDNS daemon");
    }
}

/// Translate daemon events until the browse stops.
fn pump(receiver: Receiver<ServiceEvent>, service_type: String, state: Arc<BrowseState>) {
    while let Ok(event) = receiver.recv() {
        let translated = match event {
            ServiceEvent::ServiceFound(_, fullname) => {
                instance_name(&fullname, &service_type).map(|name| DiscoveryEvent::Appeared { name })
            }
            ServiceEvent::ServiceResolved(info) => {
                let event = resolved_event(&info, &service_type);
                if let Some(DiscoveryEvent::Resolved { name, .. }) = &event {
                    state
                        .visible
                        .entry(service_type.clone())
                        .or_default()
                        .insert(name.clone());
                }
                event
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                instance_name(&fullname, &service_type).map(|name| {
                    if let Some(mut names) = state.visible.get_mut(&service_type) {
                        names.remove(&name);
                    }
                    DiscoveryEvent::Removed { name }
                })
            }
            ServiceEvent::SearchStopped(_) => break,
            _ => None,
        };

        if let Some(event) = translated {
            state.subscribers.broadcast(&service_type, &event);
        }
    }
    tracing::debug!(service_type = %service_type, "mDNS browse ended");
}

fn resolved_event(info: &ServiceInfo, service_type: &str) -> Option<DiscoveryEvent> {
    let name = instance_name(info.get_fullname(), service_type)?;
    let address = preferred_address(info.get_addresses())
        .map(|a| a.to_string())
        .unwrap_or_default();
    let attributes: BTreeMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();
    Some(DiscoveryEvent::Resolved {
        name,
        address,
        port: info.get_port(),
        attributes,
    })
}

/// IPv4 first, since that is what most hosts on a LAN can reach.
fn preferred_address(addresses: &HashSet<IpAddr>) -> Option<IpAddr> {
    let mut sorted: Vec<IpAddr> = addresses.iter().copied().collect();
    sorted.sort_by_key(|a| (a.is_ipv6(), *a));
    sorted.into_iter().next()
}

/// `alice._streamapp._tcp.local.` -> `alice`.
fn instance_name(fullname: &str, service_type: &str) -> Option<String> {
    let name = fullname.strip_suffix(service_type)?.trim_end_matches('.');
    if name.is_empty() {
        tracing::warn!(fullname, "mDNS record without instance name");
        return None;
    }
    Some(name.to_string())
}
