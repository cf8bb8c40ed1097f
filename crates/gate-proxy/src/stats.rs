//! Process-wide connection statistics
//!
//! One [`GateStats`] lives for the whole process and is shared by every
//! proxy engine. Each update is kept in local atomics (for the periodic
//! stats log) and mirrored to the `metrics` facade so an installed
//! recorder such as Prometheus can export it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

const LIVE_CONNECTIONS: &str = "tcp_live_connections";
const REQUEST_DURATION: &str = "tcp_request_duration_seconds";
const CONNECTIONS_ACCEPTED: &str = "tcp_connections_accepted_total";
const CONNECTIONS_REJECTED: &str = "tcp_connections_rejected_total";
const DIAL_FAILURES: &str = "tcp_dial_failures_total";
const BYTES_TO_TARGET: &str = "tcp_bytes_to_target_total";
const BYTES_FROM_TARGET: &str = "tcp_bytes_from_target_total";

/// Shared counters and request timer
#[derive(Debug, Default)]
pub struct GateStats {
    live_connections: AtomicI64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    dial_failures: AtomicU64,
    bytes_to_target: AtomicU64,
    bytes_from_target: AtomicU64,
    request_count: AtomicU64,
    request_total_micros: AtomicU64,
    request_max_micros: AtomicU64,
}

/// Point-in-time copy of [`GateStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub live_connections: i64,
    pub accepted: u64,
    pub rejected: u64,
    pub dial_failures: u64,
    pub bytes_to_target: u64,
    pub bytes_from_target: u64,
    pub request_count: u64,
    pub request_mean_ms: f64,
    pub request_max_ms: f64,
}

impl GateStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// An inbound connection passed admission control
    pub fn connection_opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.live_connections.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONNECTIONS_ACCEPTED).increment(1);
        metrics::gauge!(LIVE_CONNECTIONS).increment(1.0);
    }

    /// An admitted connection finished, whatever the outcome
    pub fn connection_closed(&self, lifetime: Duration) {
        self.live_connections.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!(LIVE_CONNECTIONS).decrement(1.0);

        let micros = u64::try_from(lifetime.as_micros()).unwrap_or(u64::MAX);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.request_total_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.request_max_micros.fetch_max(micros, Ordering::Relaxed);
        metrics::histogram!(REQUEST_DURATION).record(lifetime.as_secs_f64());
    }

    /// An inbound connection was turned away by admission control
    pub fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONNECTIONS_REJECTED).increment(1);
    }

    /// The target could not be reached for an admitted connection
    pub fn dial_failed(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(DIAL_FAILURES).increment(1);
    }

    /// Bytes moved by one finished relay
    pub fn bytes_relayed(&self, to_target: u64, from_target: u64) {
        self.bytes_to_target.fetch_add(to_target, Ordering::Relaxed);
        self.bytes_from_target
            .fetch_add(from_target, Ordering::Relaxed);
        metrics::counter!(BYTES_TO_TARGET).increment(to_target);
        metrics::counter!(BYTES_FROM_TARGET).increment(from_target);
    }

    /// Connections currently being relayed across all engines
    pub fn live_connections(&self) -> i64 {
        self.live_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let total_micros = self.request_total_micros.load(Ordering::Relaxed);
        let request_mean_ms = if request_count > 0 {
            total_micros as f64 / request_count as f64 / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            live_connections: self.live_connections.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            bytes_to_target: self.bytes_to_target.load(Ordering::Relaxed),
            bytes_from_target: self.bytes_from_target.load(Ordering::Relaxed),
            request_count,
            request_mean_ms,
            request_max_ms: self.request_max_micros.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Spawn a background task that logs a stats snapshot every `interval`
pub fn spawn_stats_reporter(
    stats: Arc<GateStats>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting stats reporter (interval: {} seconds)",
        interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = stats.snapshot();
            info!(
                live_connections = snapshot.live_connections,
                accepted = snapshot.accepted,
                rejected = snapshot.rejected,
                dial_failures = snapshot.dial_failures,
                bytes_to_target = snapshot.bytes_to_target,
                bytes_from_target = snapshot.bytes_from_target,
                requests = snapshot.request_count,
                request_mean_ms = snapshot.request_mean_ms,
                request_max_ms = snapshot.request_max_ms,
                "stats"
            );
        }
    })
}
