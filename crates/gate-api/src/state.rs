//! Application state

use gate_core::ProxyRegistry;
use std::sync::Arc;

/// Handle used to render the Prometheus exposition
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProxyRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ProxyRegistry>) -> Self {
        Self { registry }
    }
}
