//! streamlinkd: Streamlink presence daemon.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use streamlink_core::config::StreamlinkConfig;
use streamlink_core::ServiceDescriptor;
use streamlink_services::{
    DiscoveryCoordinator, MemoryTransport, PeerChange, PeerRegistry, RegistrationManager,
    RegistrationPolicy, Transport,
};

mod mdns;

use mdns::MdnsTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = StreamlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = StreamlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StreamlinkConfig::default()
    });

    let loopback = std::env::args().skip(1).any(|a| a == "--loopback");
    let instance = instance_name(&config, || {
        gethostname::gethostname().to_string_lossy().into_owned()
    });
    let service_type = config.network.service_type.clone();
    tracing::info!(instance = %instance, service_type = %service_type, loopback, "streamlinkd starting");

    // Transport
    let mdns = if loopback {
        None
    } else {
        Some(Arc::new(MdnsTransport::new(&config.network.host_name)?))
    };
    let transport: Arc<dyn Transport> = match &mdns {
        Some(m) => m.clone() as Arc<dyn Transport>,
        None => Arc::new(MemoryTransport::new()) as Arc<dyn Transport>,
    };

    // Engine
    let registry = PeerRegistry::new(transport.clone(), &service_type).with_local_name(&instance);
    let registration = Arc::new(RegistrationManager::new(
        transport.clone(),
        RegistrationPolicy::from(&config.registration),
    ));
    let coordinator = Arc::new(DiscoveryCoordinator::new(
        transport,
        registry.clone(),
        registration,
        &service_type,
    ));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    coordinator.start_discovery();

    let announce_task = {
        let coordinator = coordinator.clone();
        let descriptor = ServiceDescriptor::from_config(&config, instance.as_str());
        tokio::spawn(async move {
            if !coordinator.announce(descriptor).await {
                tracing::warn!("self-announcement failed, discovery of others continues");
            }
        })
    };

    let _peer_printer = {
        let mut changes = registry.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(PeerChange::Added(p)) => tracing::info!(
                        peer = %p.name,
                        address = %p.address,
                        username = p.username(),
                        status = %p.status,
                        "peer online"
                    ),
                    Ok(PeerChange::Updated(p)) => {
                        tracing::debug!(peer = %p.name, status = %p.status, "peer updated")
                    }
                    Ok(PeerChange::Removed(name)) => tracing::info!(peer = %name, "peer offline"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "peer printer lagged")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    // Status HTTP endpoint
    let api_port = config.network.api_port;
    let _status_server = {
        let state = streamlink_api::ApiState {
            coordinator: coordinator.clone(),
            instance: instance.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = streamlink_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;
    tracing::info!("shutting down");

    coordinator.shutdown().await;
    if let Err(e) = announce_task.await {
        tracing::warn!(error = %e, "announce task ended abnormally");
    }
    if let Some(m) = mdns {
        m.shutdown();
    }

    Ok(())
}

/// Configured instance name, else the username, else the host name.
fn instance_name(config: &StreamlinkConfig, host_name: impl FnOnce() -> String) -> String {
    [&config.network.instance_name, &config.profile.username]
        .into_iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(host_name)
}
