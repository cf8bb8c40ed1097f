//! Proxy error types

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error("Failed to bind {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Proxy for {0} is already started")]
    AlreadyStarted(String),

    #[error("Failed to close proxy: {0}")]
    CloseFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
