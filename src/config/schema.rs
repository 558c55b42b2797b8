//! TOML process configuration schema.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.nexus-gateway/config.toml`:
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1"
//! port = 8787
//!
//! [logging]
//! level = "info"
//! request_logs_enabled = true
//!
//! [upstream]
//! request_timeout_secs = 120
//! max_retries = 2
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway binds to.
    pub bind_addr: String,
    /// First port tried; `bind_with_fallback` walks forward on conflict.
    pub port: u16,
    /// Sequential ports attempted before giving up (exit code 2).
    pub max_port_attempts: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_owned(),
            port: 8787,
            max_port_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info"` or `"nexus_gateway=debug"`.
    pub level: String,
    /// Mirrors `ENABLE_REQUEST_LOGS`; per-request snapshot capture to disk.
    pub request_logs_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            request_logs_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Wall-clock timeout per upstream attempt, in seconds (spec §5 default 120s).
    pub request_timeout_secs: u64,
    /// Optional cloud config-sync endpoint (`CLOUD_URL`); the sync itself is
    /// an external collaborator, only the address is carried here.
    pub cloud_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            cloud_url: None,
        }
    }
}

/// Top-level application configuration.
///
/// Loaded from `~/.nexus-gateway/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
}
