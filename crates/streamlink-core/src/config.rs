//! Configuration system for Streamlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $STREAMLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/streamlink/config.toml
//!   3. ~/.config/streamlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::descriptor::{DEFAULT_PORT, SERVICE_TYPE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamlinkConfig {
    pub profile: ProfileConfig,
    pub network: NetworkConfig,
    pub registration: RegistrationConfig,
}

/// What this instance tells its peers about the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Display name. Empty = $USER.
    pub username: String,
    /// One of online, offline, streaming, busy.
    pub status: String,
    pub version: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Service type shared by every Streamlink instance.
    pub service_type: String,
    /// Instance name announced on the link. Empty = username, then host name.
    pub instance_name: String,
    /// Port announced in the service record.
    pub port: u16,
    /// mDNS host name. Empty = "<instance>.local.".
    pub host_name: String,
    /// Loopback port for the status API.
    pub api_port: u16,
}

/// Retry and health-check timing for the registration manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub monitor_interval_ms: u64,
    /// Pause before the first publish so the transport can finish starting.
    pub settle_delay_ms: u64,
    /// How long close() waits for a running health check before aborting it.
    pub shutdown_grace_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_default(),
            status: "online".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            role: "StreamApp User".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            instance_name: String::new(),
            port: DEFAULT_PORT,
            host_name: String::new(),
            api_port: 9010,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            monitor_interval_ms: 5000,
            settle_delay_ms: 2000,
            shutdown_grace_ms: 5000,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("streamlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl StreamlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a specific file, or defaults if it does not exist. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(StreamlinkConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("STREAMLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&StreamlinkConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply STREAMLINK_* overrides. Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STREAMLINK_PROFILE__USERNAME") {
            self.profile.username = v;
        }
        if let Some(v) = lookup("STREAMLINK_PROFILE__STATUS") {
            self.profile.status = v;
        }
        if let Some(v) = lookup("STREAMLINK_NETWORK__INSTANCE_NAME") {
            self.network.instance_name = v;
        }
        if let Some(p) = lookup("STREAMLINK_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(p) = lookup("STREAMLINK_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(n) = lookup("STREAMLINK_REGISTRATION__MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.registration.max_retries = n;
        }
        if let Some(ms) =
            lookup("STREAMLINK_REGISTRATION__SETTLE_DELAY_MS").and_then(|v| v.parse().ok())
        {
            self.registration.settle_delay_ms = ms;
        }
    }
}
