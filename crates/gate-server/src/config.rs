//! Configuration loading
//!
//! The configuration file is JSON by default; a `.toml` extension selects
//! TOML. Address fields are validated before anything is started, and any
//! problem is fatal to startup.

use anyhow::{Context, Result, anyhow};
use gate_proxy::{Backend, BackendConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Config file used when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "tcp-gate.json";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxies: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Control-plane listener configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub bind_ip: Option<IpAddr>,
    #[serde(default)]
    pub bind_port: Option<u16>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Stats reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Seconds between stats log lines
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,
    /// Install the Prometheus recorder and serve /metrics
    #[serde(default = "default_prometheus")]
    pub prometheus: bool,
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval_secs(),
            prometheus: default_prometheus(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_prometheus() -> bool {
    true
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let is_toml = config_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config: Config = if is_toml {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        };

        Ok(config)
    }

    /// Control-plane listen address
    pub fn server_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .server
            .bind_ip
            .ok_or_else(|| anyhow!("server.bind_ip is required, e.g. \"127.0.0.1\""))?;

        let port = match self.server.bind_port {
            Some(0) | None => {
                return Err(anyhow!("server.bind_port is required, e.g. 8080"));
            }
            Some(port) => port,
        };

        Ok(SocketAddr::new(ip, port))
    }

    /// Validated backends keyed by id
    pub fn backends(&self) -> Result<HashMap<String, Backend>> {
        self.proxies
            .iter()
            .map(|(id, proxy)| {
                let backend = Backend::from_config(id, proxy.clone())
                    .with_context(|| format!("Invalid configuration for proxies.{}", id))?;
                Ok((id.clone(), backend))
            })
            .collect()
    }
}
