//! Discovery coordinator: wires the transport's event stream into the
//! peer registry and sequences shutdown.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use streamlink_core::{DiscoveryEvent, ServiceDescriptor};

use crate::registration::RegistrationManager;
use crate::registry::PeerRegistry;
use crate::transport::{SubscriptionId, Transport};

/// The single active discovery subscription.
struct Listener {
    id: SubscriptionId,
    pump: JoinHandle<()>,
}

pub struct DiscoveryCoordinator {
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    registration: Arc<RegistrationManager>,
    service_type: String,
    listener: Mutex<Option<Listener>>,
}

impl DiscoveryCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: PeerRegistry,
        registration: Arc<RegistrationManager>,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            registry,
            registration,
            service_type: service_type.into(),
            listener: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Publish this instance. See [`RegistrationManager::register`].
    pub async fn announce(&self, descriptor: ServiceDescriptor) -> bool {
        self.registration.register(descriptor).await
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_registered()
    }

    pub fn is_discovering(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to discovery events for the service type.
    ///
    /// Exactly one listener is registered no matter how often this is
    /// called. Returns whether discovery is active afterwards. Must be called
    /// from within a Tokio runtime.
    pub fn start_discovery(&self) -> bool {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!(service_type = %self.service_type, "discovery already active");
            return true;
        }

        let subscription = match self.transport.subscribe(&self.service_type) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(service_type = %self.service_type, error = %e, "failed to start discovery");
                return false;
            }
        };

        let pump = tokio::spawn(event_loop(self.registry.clone(), subscription.events));
        *slot = Some(Listener {
            id: subscription.id,
            pump,
        });
        tracing::info!(
            service_type = %self.service_type,
            subscription = subscription.id,
            "discovery started"
        );
        true
    }

    /// Drop the discovery subscription. No-op if discovery is not running.
    pub fn stop_discovery(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match listener {
            Some(l) => {
                self.transport.unsubscribe(l.id);
                l.pump.abort();
                tracing::info!(service_type = %self.service_type, "discovery stopped");
            }
            None => tracing::debug!("stop_discovery: discovery not active"),
        }
    }

    /// Stop discovery, retract the announcement, then release registration
    /// resources. Always runs to completion; safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.stop_discovery();
        self.registration.unregister();
        self.registration.close().await;
        tracing::info!("discovery service shut down");
    }
}

/// Feed transport events to the registry until the subscription closes.
async fn event_loop(registry: PeerRegistry, mut events: mpsc::UnboundedReceiver<DiscoveryEvent>) {
    while let Some(event) = events.recv().await {
        tracing::trace!(peer = event.name(), ?event, "discovery event");
        registry.handle(event);
    }
    tracing::debug!("discovery event stream closed");
}
