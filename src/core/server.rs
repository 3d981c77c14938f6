//! TCP server engine

use crate::connection::driver::{run_connection, signalled, Transport};
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
use crate::consumer::Consumer;
use crate::core::settings::Settings;
use crate::core::socket::{bind_listener, configure_stream, SocketSettings};
use crate::error::{NetworkError, Result};
use crate::notice::{Notice, NoticeSink, TracingSink};
use crate::pooling::{BufferPool, BufferPoolStats, WriteLimiter};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

/// Everything owned by one start/stop cycle
struct Running {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    limiter: WriteLimiter,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    connection_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// TCP server
///
/// Accepts connections up to `max_connections`, runs each one on its own
/// task and reports everything to a single [`Consumer`]. Settings are
/// copied at construction; a server can be started again after `stop`.
pub struct TcpServer {
    settings: Settings,
    consumer: Arc<dyn Consumer>,
    sink: Arc<dyn NoticeSink>,
    state: RwLock<ServerState>,
    running: Option<Running>,
    last_pool: Option<Arc<BufferPool>>,
}

impl TcpServer {
    /// Create a stopped server
    #[must_use]
    pub fn new(settings: &Settings, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            settings: settings.clone(),
            consumer,
            sink: Arc::new(TracingSink),
            state: RwLock::new(ServerState::Stopped),
            running: None,
            last_pool: None,
        }
    }

    /// Report notices to `sink` instead of `tracing`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start listening on `bind_address`
    ///
    /// Returns the bound address, which differs from the requested one when
    /// port 0 was given.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::AlreadyStarted`] unless the server is stopped
    /// - [`NetworkError::InvalidSettings`] if the settings do not validate
    /// - [`NetworkError::InvalidAddress`] if the address cannot be resolved
    /// - [`NetworkError::Io`] if binding fails
    ///
    /// On error the server stays stopped.
    pub async fn start(&mut self, bind_address: &str) -> Result<SocketAddr> {
        {
            let mut state = self.state.write();
            if *state != ServerState::Stopped {
                return Err(NetworkError::AlreadyStarted);
            }
            *state = ServerState::Starting;
        }

        match self.launch(bind_address).await {
            Ok(running) => {
                let addr = running.local_addr;
                self.last_pool = Some(Arc::clone(&running.pool));
                self.running = Some(running);
                self.set_state(ServerState::Listening);
                self.sink.notice(&Notice::Listening { addr });
                Ok(addr)
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch(&self, bind_address: &str) -> Result<Running> {
        self.settings.validate()?;

        let addr = resolve(bind_address).await?;
        let listener = bind_listener(addr, &self.settings.socket)?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new(self.settings.max_connections));
        let pool = Arc::new(BufferPool::new(
            self.settings.max_connections,
            self.settings.buffer_size,
            self.settings.pool_policy,
        ));
        let limiter = WriteLimiter::new(self.settings.max_simultaneous_writes);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection_tasks = Arc::new(Mutex::new(Vec::new()));

        let acceptor = Acceptor {
            listener,
            local_addr,
            registry: Arc::clone(&registry),
            pool: Arc::clone(&pool),
            socket: self.settings.socket.clone(),
            transport: Transport {
                consumer: Arc::clone(&self.consumer),
                limiter: limiter.clone(),
                sink: Arc::clone(&self.sink),
                shutdown: shutdown_rx,
                write_timeout: self.settings.write_timeout,
            },
            tasks: Arc::clone(&connection_tasks),
        };
        let accept_task = tokio::spawn(acceptor.run());

        Ok(Running {
            local_addr,
            registry,
            pool,
            limiter,
            shutdown_tx,
            accept_task,
            connection_tasks,
        })
    }

    /// Stop the server
    ///
    /// Stops accepting, closes every connection and waits up to
    /// `shutdown_timeout` for their `Disconnected` notifications. Tasks
    /// still running after that are aborted. When this returns no
    /// connection is registered, no buffer is checked out and the consumer
    /// receives nothing further. Calling `stop` on a stopped server is a
    /// no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        self.set_state(ServerState::Stopping);

        running.shutdown_tx.send_replace(true);
        if let Err(e) = running.accept_task.await {
            tracing::debug!("Accept task ended abnormally: {}", e);
        }

        running.pool.close();
        running.limiter.close();

        let tasks = std::mem::take(&mut *running.connection_tasks.lock());
        let aborted = join_all(tasks, self.settings.shutdown_timeout).await;
        if aborted > 0 {
            tracing::warn!(
                "{} connection tasks did not finish within {:?}",
                aborted,
                self.settings.shutdown_timeout
            );
        }
        for connection in running.registry.clear() {
            connection.advance(ConnectionState::Closed);
        }

        self.consumer.on_stopped();
        self.sink.notice(&Notice::Stopped { aborted });
        self.set_state(ServerState::Stopped);

        Ok(())
    }

    fn set_state(&self, state: ServerState) {
        *self.state.write() = state;
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// True while listening
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Bound address while running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Settings this server was created with
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of registered connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.registry.count())
    }

    /// Snapshot of the registered connections
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.running
            .as_ref()
            .map_or_else(Vec::new, |r| r.registry.snapshot())
    }

    /// Look up a registered connection
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.running.as_ref().and_then(|r| r.registry.try_get(id))
    }

    /// Queue `data` on every live connection; returns how many accepted it
    pub fn broadcast(&self, data: impl Into<Bytes>) -> usize {
        let Some(running) = &self.running else {
            return 0;
        };
        let data = data.into();
        let mut delivered = 0;
        running.registry.for_each(|connection| {
            if connection.send(data.clone()).is_ok() {
                delivered += 1;
            }
        });
        delivered
    }

    /// Receive buffer pool statistics of the current or most recent run
    #[must_use]
    pub fn pool_stats(&self) -> Option<BufferPoolStats> {
        self.last_pool.as_ref().map(|pool| pool.stats())
    }

    /// Writes currently holding a limiter slot
    #[must_use]
    pub fn outstanding_writes(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.limiter.outstanding())
    }
}

/// Emergency cleanup when a running `TcpServer` is dropped
///
/// Drop cannot await, so connections are aborted rather than closed and
/// the consumer receives neither `Disconnected` nor `on_stopped`. Always
/// call [`TcpServer::stop`] for a graceful shutdown.
impl Drop for TcpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            tracing::warn!("TcpServer dropped while still running - performing emergency cleanup");

            running.shutdown_tx.send_replace(true);
            running.accept_task.abort();

            let tasks = std::mem::take(&mut *running.connection_tasks.lock());
            for task in tasks {
                task.abort();
            }

            running.pool.close();
            running.limiter.close();
            for connection in running.registry.clear() {
                connection.advance(ConnectionState::Closed);
            }
        }
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Parse or resolve a bind address
async fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse() {
        return Ok(addr);
    }
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| NetworkError::invalid_address(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| NetworkError::invalid_address(format!("{}: no addresses", address)))
}

/// Wait for every task until `timeout` elapses, then abort the rest.
/// Returns the number of aborted tasks.
async fn join_all(tasks: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut aborted = 0;

    for mut task in tasks {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            task.abort();
            let _ = task.await;
            aborted += 1;
        }
    }
    aborted
}

struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    socket: SocketSettings,
    transport: Transport,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Acceptor {
    async fn run(self) {
        let mut shutdown = self.transport.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let local = stream.local_addr().unwrap_or(self.local_addr);
                    let (connection, io) = match self.registry.register(peer, local) {
                        Ok(registered) => registered,
                        Err(NetworkError::CapacityExceeded(max_connections)) => {
                            self.transport.sink.notice(&Notice::CapacityRefused {
                                peer,
                                max_connections,
                            });
                            drop(stream);
                            continue;
                        }
                        Err(e) => {
                            tracing::debug!("Refusing {}: {}", peer, e);
                            continue;
                        }
                    };

                    if let Err(e) = configure_stream(&stream, &self.socket) {
                        tracing::warn!("Failed to configure socket for {}: {}", peer, e);
                    }

                    let handle = tokio::spawn(run_connection(
                        connection,
                        io,
                        stream,
                        Arc::clone(&self.registry),
                        Arc::clone(&self.pool),
                        self.transport.clone(),
                    ));

                    let mut tasks = self.tasks.lock();
                    tasks.retain(|task| !task.is_finished());
                    tasks.push(handle);
                }
                Err(e) => {
                    self.transport.sink.notice(&Notice::AcceptFailed {
                        reason: e.to_string(),
                    });
                    // EMFILE and friends persist; avoid spinning on them
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        tracing::debug!("Stopped accepting on {}", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::QueuedConsumer;

    fn server(settings: &Settings) -> TcpServer {
        TcpServer::new(settings, Arc::new(QueuedConsumer::<Bytes>::new()))
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = server(&Settings::default());
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_running());
        assert_eq!(server.connection_count(), 0);
        assert!(server.local_addr().is_none());
        assert_eq!(server.broadcast(Bytes::from_static(b"x")), 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut server = server(&Settings::default());
        let addr = server.start("127.0.0.1:0").await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());

        let err = server.start("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, NetworkError::AlreadyStarted));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_settings_leave_server_stopped() {
        let mut server = server(&Settings::default().with_max_connections(0));
        let err = server.start("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidSettings(_)));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let mut server = server(&Settings::default());
        let err = server.start("not an address").await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidAddress(_)));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut server = server(&Settings::default());
        server.stop().await.unwrap();
        server.start("127.0.0.1:0").await.unwrap();
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_join_all_aborts_stragglers() {
        let quick = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());
        let aborted = join_all(vec![quick, stuck], Duration::from_millis(20)).await;
        assert_eq!(aborted, 1);
    }
}
