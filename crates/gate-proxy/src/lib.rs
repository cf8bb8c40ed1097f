//! TCP Gate Proxy Engine
//!
//! This crate provides the per-backend proxy engine: the backend
//! descriptor, the listening socket with its admission-controlled
//! accept loop, and the byte relay to the configured target.

pub mod backend;
pub mod engine;
pub mod error;
pub mod stats;

pub use backend::{Backend, BackendConfig, DEFAULT_PROTOCOL};
pub use engine::{Lifecycle, ProxyEngine, ProxyFactory, TcpProxyFactory};
pub use error::ProxyError;
pub use stats::{GateStats, StatsSnapshot, spawn_stats_reporter};
