//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Proxy error: {0}")]
    Proxy(#[from] gate_proxy::ProxyError),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
