//! Backend descriptors
//!
//! A backend is one proxied service: where the gate listens, where
//! accepted connections are forwarded, and how many may be open at once.
//! [`BackendConfig`] is the loose wire form read from the configuration
//! file and the control-plane API; [`Backend`] is the validated record
//! handed to a proxy engine.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Protocol label used when none is configured
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Backend as it appears in configuration files and request bodies.
///
/// Every field is optional here so that missing values can be reported
/// by name instead of as a generic decode error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    /// Ignored when the id is supplied by the surrounding key or path
    #[serde(default)]
    pub id: Option<String>,
    /// Display label (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form protocol label (defaults to "tcp")
    #[serde(default, alias = "proto")]
    pub protocol: Option<String>,
    /// Address the gate listens on
    #[serde(default)]
    pub bind_ip: Option<String>,
    #[serde(default)]
    pub bind_port: Option<i64>,
    /// Address accepted connections are forwarded to
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    /// Listen backlog depth
    #[serde(default)]
    pub connection_buffer: Option<i64>,
    /// Ceiling on simultaneously relayed connections (0 = unbounded)
    #[serde(default)]
    pub max_concurrent: Option<i64>,
}

/// Validated backend descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: String,
    pub name: String,
    pub protocol: String,
    pub bind_ip: IpAddr,
    pub bind_port: u16,
    pub ip: IpAddr,
    pub port: u16,
    pub connection_buffer: u32,
    pub max_concurrent: u32,
}

impl Backend {
    /// Build a backend from its wire form.
    ///
    /// The `id` argument always wins over any id carried in the body.
    /// `name` falls back to the id and `protocol` to [`DEFAULT_PROTOCOL`].
    pub fn from_config(id: &str, config: BackendConfig) -> Result<Self, ProxyError> {
        if id.is_empty() {
            return Err(ProxyError::InvalidBackend(
                "id is required, e.g. \"mongodb\"".to_string(),
            ));
        }

        let name = config
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());
        let protocol = config
            .protocol
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());

        let backend = Self {
            id: id.to_string(),
            name,
            protocol,
            bind_ip: parse_ip(id, "bind_ip", config.bind_ip.as_deref())?,
            bind_port: parse_port(id, "bind_port", config.bind_port)?,
            ip: parse_ip(id, "ip", config.ip.as_deref())?,
            port: parse_port(id, "port", config.port)?,
            connection_buffer: parse_limit(id, "connection_buffer", config.connection_buffer)?,
            max_concurrent: parse_limit(id, "max_concurrent", config.max_concurrent)?,
        };

        Ok(backend)
    }

    /// Check the invariants a proxy engine relies on
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.id.is_empty() {
            return Err(ProxyError::InvalidBackend("id must not be empty".to_string()));
        }
        if self.bind_port == 0 {
            return Err(ProxyError::InvalidBackend(format!(
                "{}: bind_port must be in [1, 65535]",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(ProxyError::InvalidBackend(format!(
                "{}: port must be in [1, 65535]",
                self.id
            )));
        }
        Ok(())
    }

    /// Address the gate listens on
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.bind_port)
    }

    /// Address accepted connections are forwarded to
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether admission control is disabled
    pub fn is_unbounded(&self) -> bool {
        self.max_concurrent == 0
    }
}

fn parse_ip(id: &str, field: &str, value: Option<&str>) -> Result<IpAddr, ProxyError> {
    let value = value.filter(|v| !v.is_empty()).ok_or_else(|| {
        ProxyError::InvalidBackend(format!(
            "{}: {} is required, e.g. \"127.0.0.1\"",
            id, field
        ))
    })?;

    value.parse().map_err(|_| {
        ProxyError::InvalidBackend(format!("{}: {} '{}' is not an IP address", id, field, value))
    })
}

fn parse_port(id: &str, field: &str, value: Option<i64>) -> Result<u16, ProxyError> {
    let value = value.ok_or_else(|| {
        ProxyError::InvalidBackend(format!("{}: {} is required, e.g. 27017", id, field))
    })?;

    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ProxyError::InvalidBackend(format!(
            "{}: {} {} is out of range [1, 65535]",
            id, field, value
        ))),
    }
}

fn parse_limit(id: &str, field: &str, value: Option<i64>) -> Result<u32, ProxyError> {
    let value = value.unwrap_or(0);

    u32::try_from(value).map_err(|_| {
        ProxyError::InvalidBackend(format!(
            "{}: {} {} must be a non-negative integer",
            id, field, value
        ))
    })
}
