//! HTTP API handlers: exposes presence and discovery state as JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use streamlink_core::PeerStatus;
use streamlink_services::{DiscoveryCoordinator, RegistrationPolicy};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<DiscoveryCoordinator>,
    /// Instance name this daemon announces.
    pub instance: String,
    /// Fires once to stop the daemon.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub instance: String,
    pub service_type: String,
    pub registered: bool,
    pub state: &'static str,
    pub retry_count: u32,
    pub discovering: bool,
    pub peers_discovered: usize,
    pub policy: PolicyInfo,
}

/// Registration timing in effect, in milliseconds.
#[derive(Debug, Serialize)]
pub struct PolicyInfo {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub monitor_interval_ms: u64,
    pub settle_delay_ms: u64,
}

impl From<&RegistrationPolicy> for PolicyInfo {
    fn from(p: &RegistrationPolicy) -> Self {
        Self {
            max_retries: p.max_retries,
            retry_delay_ms: p.retry_delay.as_millis() as u64,
            monitor_interval_ms: p.monitor_interval.as_millis() as u64,
            settle_delay_ms: p.settle_delay.as_millis() as u64,
        }
    }
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let c = &state.coordinator;
    let registration = c.registration();
    Json(StatusResponse {
        instance: state.instance.clone(),
        service_type: c.service_type().to_string(),
        registered: registration.is_registered(),
        state: registration.state().as_str(),
        retry_count: registration.retry_count(),
        discovering: c.is_discovering(),
        peers_discovered: c.registry().len(),
        policy: PolicyInfo::from(registration.policy()),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub status: PeerStatus,
    pub username: String,
    pub version: String,
    pub attributes: BTreeMap<String, String>,
    pub last_seen_secs: u64,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .coordinator
        .registry()
        .snapshot()
        .into_iter()
        .map(|p| PeerInfo {
            username: p.username().to_string(),
            version: p.version().to_string(),
            address: p.address.to_string(),
            last_seen_secs: p.last_seen.elapsed().as_secs(),
            name: p.name,
            port: p.port,
            status: p.status,
            attributes: p.attributes,
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<serde_json::Value> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(serde_json::json!({ "shutting_down": true }))
}
