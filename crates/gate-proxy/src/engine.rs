//! Proxy engine
//!
//! A [`ProxyEngine`] owns one backend's listening socket. Starting it binds
//! the socket and spawns an accept loop; every admitted connection is dialed
//! through to the backend's target and relayed on its own task until either
//! peer hangs up, at which point both ends are closed. Closing the
//! engine stops the accept loop and releases the socket but leaves
//! established relays running until their peers hang up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::backend::Backend;
use crate::error::ProxyError;
use crate::stats::GateStats;

/// Listen backlog used when a backend sets no connection buffer
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-direction relay buffer
const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// Start/stop capability of a proxied backend
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Bind the listening socket and begin accepting.
    ///
    /// Returns the bound address. On failure nothing is left bound.
    fn start(&self) -> Result<SocketAddr, ProxyError>;

    /// Stop accepting new connections. Closing twice is a no-op.
    async fn close(&self) -> Result<(), ProxyError>;

    /// The descriptor this proxy was built from
    fn backend(&self) -> &Backend;
}

/// Builds proxies for the registry
pub trait ProxyFactory: Send + Sync {
    fn create(&self, backend: Backend) -> Result<Arc<dyn Lifecycle>, ProxyError>;
}

/// Factory producing [`ProxyEngine`]s that share one stats object
pub struct TcpProxyFactory {
    stats: Arc<GateStats>,
}

impl TcpProxyFactory {
    pub fn new(stats: Arc<GateStats>) -> Self {
        Self { stats }
    }
}

impl ProxyFactory for TcpProxyFactory {
    fn create(&self, backend: Backend) -> Result<Arc<dyn Lifecycle>, ProxyError> {
        let engine = ProxyEngine::new(backend, Arc::clone(&self.stats))?;
        Ok(Arc::new(engine))
    }
}

/// State shared between the engine handle, its accept loop and relays
struct Shared {
    backend: Backend,
    stats: Arc<GateStats>,
    open_connections: AtomicUsize,
}

/// Handles of a started engine
struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// TCP proxy for a single backend
pub struct ProxyEngine {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("backend", &self.shared.backend)
            .field("open_connections", &self.open_connections())
            .finish_non_exhaustive()
    }
}

impl ProxyEngine {
    /// Create an engine for `backend`. Performs no I/O.
    pub fn new(backend: Backend, stats: Arc<GateStats>) -> Result<Self, ProxyError> {
        backend.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                stats,
                open_connections: AtomicUsize::new(0),
            }),
            running: Mutex::new(None),
        })
    }

    /// Connections currently being relayed by this engine
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::Acquire)
    }

    /// Bound address while the engine is running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn backlog(&self) -> u32 {
        match self.shared.backend.connection_buffer {
            0 => DEFAULT_BACKLOG,
            n => n,
        }
    }
}

#[async_trait]
impl Lifecycle for ProxyEngine {
    fn start(&self) -> Result<SocketAddr, ProxyError> {
        let mut running = self.running.lock();
        let backend = &self.shared.backend;

        if running.is_some() {
            return Err(ProxyError::AlreadyStarted(backend.id.clone()));
        }

        let bind_addr = backend.bind_addr();
        let listener = bind_listener(bind_addr, self.backlog())
            .map_err(|source| ProxyError::BindFailure {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(
            accept_loop(Arc::clone(&self.shared), listener, shutdown_rx)
                .instrument(tracing::info_span!("proxy", id = %backend.id)),
        );

        info!(
            id = %backend.id,
            protocol = %backend.protocol,
            bind_addr = %local_addr,
            target_addr = %backend.target_addr(),
            max_concurrent = backend.max_concurrent,
            "Proxy started"
        );

        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
        });

        Ok(local_addr)
    }

    async fn close(&self) -> Result<(), ProxyError> {
        let running = { self.running.lock().take() };
        let Some(running) = running else {
            return Ok(());
        };

        // The receiver is gone only if the accept loop already exited
        let _ = running.shutdown.send(true);

        running.accept_task.await.map_err(|e| {
            ProxyError::CloseFailure(format!(
                "accept loop for {} did not stop cleanly: {}",
                self.shared.backend.id, e
            ))
        })?;

        info!(
            id = %self.shared.backend.id,
            bind_addr = %running.local_addr,
            open_connections = self.open_connections(),
            "Proxy stopped"
        );
        Ok(())
    }

    fn backend(&self) -> &Backend {
        &self.shared.backend
    }
}

impl Drop for ProxyEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((inbound, peer_addr)) => admit(&shared, inbound, peer_addr),
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }

    debug!("Accept loop stopped");
}

fn admit(shared: &Arc<Shared>, inbound: TcpStream, peer_addr: SocketAddr) {
    let Some(slot) = ConnectionSlot::acquire(shared) else {
        shared.stats.connection_rejected();
        warn!(
            peer_addr = %peer_addr,
            max_concurrent = shared.backend.max_concurrent,
            "Connection rejected: max concurrent connections reached"
        );
        drop(inbound);
        return;
    };

    debug!(peer_addr = %peer_addr, "Connection accepted");

    tokio::spawn(
        relay(Arc::clone(shared), inbound, slot)
            .instrument(tracing::debug_span!("connection", peer = %peer_addr)),
    );
}

async fn relay(shared: Arc<Shared>, mut inbound: TcpStream, slot: ConnectionSlot) {
    let target_addr = shared.backend.target_addr();

    let mut outbound = match TcpStream::connect(target_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            shared.stats.dial_failed();
            warn!(target_addr = %target_addr, error = %e, "Failed to dial target");
            drop(slot);
            return;
        }
    };

    let mut to_target = 0u64;
    let mut from_target = 0u64;

    let (mut client_read, mut client_write) = inbound.split();
    let (mut target_read, mut target_write) = outbound.split();

    // The first direction to finish tears down both; the other is dropped.
    let result = tokio::select! {
        result = pipe(&mut client_read, &mut target_write, &mut to_target) => result,
        result = pipe(&mut target_read, &mut client_write, &mut from_target) => result,
    };

    shared.stats.bytes_relayed(to_target, from_target);
    match result {
        Ok(()) => debug!(
            bytes_to_target = to_target,
            bytes_from_target = from_target,
            "Connection closed"
        ),
        Err(e) => debug!(
            bytes_to_target = to_target,
            bytes_from_target = from_target,
            error = %e,
            "Connection closed with error"
        ),
    }

    drop(outbound);
    drop(inbound);
    drop(slot);
}

/// Copy one direction until EOF, counting every byte written
async fn pipe<R, W>(reader: &mut R, writer: &mut W, relayed: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return writer.shutdown().await;
        }
        writer.write_all(&buf[..n]).await?;
        *relayed += n as u64;
    }
}

/// One admitted connection. Releasing it decrements the live count and
/// records the connection lifetime, so every decrement pairs with exactly
/// one successful increment.
struct ConnectionSlot {
    shared: Arc<Shared>,
    opened_at: Instant,
}

impl ConnectionSlot {
    fn acquire(shared: &Arc<Shared>) -> Option<Self> {
        let max = shared.backend.max_concurrent as usize;

        shared
            .open_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if max > 0 && current >= max {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .ok()?;

        shared.stats.connection_opened();

        Some(Self {
            shared: Arc::clone(shared),
            opened_at: Instant::now(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.shared
            .stats
            .connection_closed(self.opened_at.elapsed());
        self.shared
            .open_connections
            .fetch_sub(1, Ordering::AcqRel);
    }
}
