//! TCP Gate - runtime-configurable TCP reverse proxy

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, DEFAULT_CONFIG_FILE, LoggingConfig};
use gate_api::{AppState, MetricsHandle, create_router};
use gate_core::ProxyRegistry;
use gate_proxy::{GateStats, TcpProxyFactory, spawn_stats_reporter};

/// How often the Prometheus recorder drains histogram buckets
const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// TCP Gate - TCP reverse proxy with a runtime control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (JSON, or TOML with a .toml extension)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Control-plane bind address
    #[arg(long, env = "TCP_GATE_BIND")]
    bind: Option<IpAddr>,

    /// Control-plane port
    #[arg(short, long, env = "TCP_GATE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_ip = Some(bind);
    }
    if let Some(port) = args.port {
        config.server.bind_port = Some(port);
    }

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting TCP Gate v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", args.config);

    // Everything below must be valid before any socket is opened
    let addr = config.server_addr()?;
    let backends = config.backends()?;

    for backend in backends.values() {
        info!(
            id = %backend.id,
            name = %backend.name,
            protocol = %backend.protocol,
            bind_addr = %backend.bind_addr(),
            target_addr = %backend.target_addr(),
            connection_buffer = backend.connection_buffer,
            max_concurrent = backend.max_concurrent,
            "Configured backend"
        );
    }

    // Install the metrics recorder before any proxy reports
    let metrics_handle = if config.stats.prometheus {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        let handle = Arc::new(handle);
        spawn_metrics_upkeep(handle.clone());
        Some(handle)
    } else {
        None
    };

    // Start the configured proxies
    let stats = Arc::new(GateStats::new());
    let factory = Arc::new(TcpProxyFactory::new(stats.clone()));
    let registry = Arc::new(ProxyRegistry::new(factory));
    registry.configure(backends);

    let reporter = spawn_stats_reporter(stats, config.stats.interval());

    // Create router
    let app = create_router(AppState::new(registry.clone()), metrics_handle)
        .layer(TraceLayer::new_for_http());

    info!("Control plane listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control plane on {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reporter.abort();

    if let Err(e) = registry.close_all().await {
        warn!(error = %e, "Some proxies failed to close");
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Periodically drain the Prometheus recorder's histogram buffers
fn spawn_metrics_upkeep(handle: Arc<MetricsHandle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
