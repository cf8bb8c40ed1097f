//! Registry of running proxies
//!
//! The ProxyRegistry is responsible for:
//! - Starting one proxy per configured backend at startup
//! - Adding and removing proxies at runtime
//! - Rolling back entries whose proxy failed to start
//! - Closing every proxy on shutdown

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use gate_proxy::{Backend, Lifecycle, ProxyFactory};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::CoreError;

/// Concurrency-safe map of backend id to running proxy
pub struct ProxyRegistry {
    factory: Arc<dyn ProxyFactory>,
    /// Every read and write goes through this single lock
    proxies: Mutex<HashMap<String, Arc<dyn Lifecycle>>>,
}

impl ProxyRegistry {
    /// Create an empty registry that builds proxies with `factory`
    pub fn new(factory: Arc<dyn ProxyFactory>) -> Self {
        Self {
            factory,
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Start a proxy for every backend in `backends`.
    ///
    /// A backend that fails to start is logged and skipped; the others
    /// still start. Returns the number of proxies started.
    pub fn configure(&self, backends: HashMap<String, Backend>) -> usize {
        let total = backends.len();
        let mut started = 0;

        for (id, backend) in backends {
            match self.add(&id, backend) {
                Ok(_) => started += 1,
                Err(e) => {
                    error!(id = %id, error = %e, "Failed to start proxy, skipping");
                }
            }
        }

        info!("Started {} of {} configured proxies", started, total);
        started
    }

    /// Create and start a proxy for `backend` under `id`.
    ///
    /// The existence check, insert and start happen under the registry
    /// lock, so concurrent adds of one id yield exactly one success. If the
    /// proxy fails to start its entry is removed before the error returns.
    pub fn add(&self, id: &str, mut backend: Backend) -> Result<SocketAddr, CoreError> {
        debug!(id = %id, "Adding proxy");
        backend.id = id.to_string();

        let mut proxies = self.proxies.lock();

        if proxies.contains_key(id) {
            return Err(CoreError::Conflict(id.to_string()));
        }

        let proxy = self.factory.create(backend)?;
        proxies.insert(id.to_string(), Arc::clone(&proxy));

        match proxy.start() {
            Ok(local_addr) => Ok(local_addr),
            Err(e) => {
                error!(id = %id, error = %e, "Failed to start proxy");
                proxies.remove(id);
                Err(e.into())
            }
        }
    }

    /// Descriptor of the proxy registered under `id`
    pub fn get(&self, id: &str) -> Result<Backend, CoreError> {
        let proxies = self.proxies.lock();
        proxies
            .get(id)
            .map(|p| p.backend().clone())
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.proxies.lock().contains_key(id)
    }

    /// Snapshot of every registered descriptor, in no particular order
    pub fn list(&self) -> Vec<Backend> {
        let proxies = self.proxies.lock();
        proxies.values().map(|p| p.backend().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.lock().is_empty()
    }

    /// Close the proxy registered under `id` and drop its entry.
    ///
    /// The entry is removed even when closing fails; the close error is
    /// still returned to the caller.
    pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
        info!(id = %id, "Removing proxy");

        let proxy = { self.proxies.lock().get(id).cloned() };
        let proxy = proxy.ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        let result = proxy.close().await;
        if let Err(e) = &result {
            error!(id = %id, error = %e, "Failed to close proxy");
        }

        {
            let mut proxies = self.proxies.lock();
            // Leave a proxy re-added under the same id while we were closing
            if proxies.get(id).is_some_and(|p| Arc::ptr_eq(p, &proxy)) {
                proxies.remove(id);
            }
        }

        result.map_err(CoreError::from)
    }

    /// Close and drop every proxy.
    ///
    /// Keeps going past failures and returns the last error seen.
    pub async fn close_all(&self) -> Result<(), CoreError> {
        let proxies: Vec<(String, Arc<dyn Lifecycle>)> =
            { self.proxies.lock().drain().collect() };

        info!("Closing {} proxies", proxies.len());

        let mut last_error = None;
        for (id, proxy) in proxies {
            if let Err(e) = proxy.close().await {
                error!(id = %id, error = %e, "Failed to close proxy");
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
