//! Streamlink integration test harness.
//!
//! Every test builds one or more nodes on a shared in-memory link and drives
//! them through the public crate APIs:
//!
//!   cargo test --test integration
//!
//! Tests run on a paused Tokio clock, so settle delays, retry backoff and
//! monitor ticks elapse instantly and deterministically.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use streamlink_core::ServiceDescriptor;
use streamlink_services::{
    DiscoveryCoordinator, MemoryTransport, PeerChange, PeerRegistry, RegistrationManager,
    RegistrationPolicy,
};

mod discovery;
mod registration;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SERVICE_TYPE: &str = "_x._tcp.local.";

/// How long a test waits for an asynchronous outcome before failing.
pub const WAIT: Duration = Duration::from_secs(30);

/// One simulated host: a coordinator that filters out its own announcement.
pub struct Node {
    pub name: String,
    pub coordinator: Arc<DiscoveryCoordinator>,
}

impl Node {
    pub fn registry(&self) -> &PeerRegistry {
        self.coordinator.registry()
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        self.coordinator.registration()
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        descriptor(&self.name)
    }
}

pub fn link() -> Arc<MemoryTransport> {
    Arc::new(MemoryTransport::new())
}

pub fn node(link: &Arc<MemoryTransport>, name: &str) -> Node {
    node_with_policy(link, name, RegistrationPolicy::default())
}

pub fn node_with_policy(link: &Arc<MemoryTransport>, name: &str, policy: RegistrationPolicy) -> Node {
    let registry = PeerRegistry::new(link.clone(), SERVICE_TYPE).with_local_name(name);
    let registration = Arc::new(RegistrationManager::new(link.clone(), policy));
    Node {
        name: name.to_string(),
        coordinator: Arc::new(DiscoveryCoordinator::new(
            link.clone(),
            registry,
            registration,
            SERVICE_TYPE,
        )),
    }
}

pub fn descriptor(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(SERVICE_TYPE, name, 8080)
        .with_attribute("username", name)
        .with_attribute("status", "online")
}

/// Next registry change, or an error if none arrives within [`WAIT`].
pub async fn next_change(rx: &mut broadcast::Receiver<PeerChange>) -> Result<PeerChange> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .context("timed out waiting for a peer change")?
        .context("peer change channel closed")
}

/// Poll `condition` every 10 ms until it holds or [`WAIT`] elapses.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Await `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: Future>(what: &str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(WAIT, fut)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}
