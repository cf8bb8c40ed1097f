//! TCP Gate Core
//!
//! This crate provides the registry of running proxies: the concurrency-safe
//! map from backend id to proxy engine, with start rollback and aggregate
//! shutdown.

pub mod error;
pub mod registry;

pub use error::CoreError;
pub use registry::ProxyRegistry;
