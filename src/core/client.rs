//! TCP client connector

use crate::connection::driver::{run_connection, Transport};
use crate::connection::{Connection, ConnectionRegistry, ConnectionState};
use crate::consumer::Consumer;
use crate::core::socket::{configure_stream, SocketSettings};
use crate::error::{NetworkError, Result};
use crate::notice::{Notice, NoticeSink, TracingSink};
use crate::pooling::{AcquirePolicy, BufferPool, WriteLimiter};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `close` lets the writer flush before cutting the connection
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Receive buffer size in bytes
    pub buffer_size: usize,
    /// Writes allowed in flight at once
    pub max_simultaneous_writes: usize,
    /// Longest a single write may hold a write slot before the connection
    /// is closed
    pub write_timeout: Duration,
    /// Connect attempts made by [`TcpClient::reconnect`]
    pub max_reconnect_attempts: usize,
    /// Socket options
    pub socket: SocketSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2000,
            max_simultaneous_writes: 16,
            write_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 3,
            socket: SocketSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive buffer size
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set simultaneous write limit
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_simultaneous_writes(mut self, max: usize) -> Self {
        self.max_simultaneous_writes = max;
        self
    }

    /// Set write timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set reconnect attempts
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_reconnect_attempts(mut self, attempts: usize) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set socket options
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_socket(mut self, socket: SocketSettings) -> Self {
        self.socket = socket;
        self
    }

    /// Check configuration values
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(NetworkError::invalid_settings("buffer_size must be positive"));
        }
        if self.max_simultaneous_writes == 0 {
            return Err(NetworkError::invalid_settings(
                "max_simultaneous_writes must be positive",
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(NetworkError::invalid_settings(
                "write_timeout must be positive",
            ));
        }
        self.socket.validate()
    }
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One established connection and its task
struct Session {
    connection: Arc<Connection>,
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// TCP client
///
/// Connections made by the client run through the same task structure as
/// server connections, so the consumer sees one `Connected`, the data and
/// one `Disconnected` per connection whichever side closes.
pub struct TcpClient {
    config: ClientConfig,
    consumer: Arc<dyn Consumer>,
    sink: Arc<dyn NoticeSink>,
    state: ClientState,
    address: Option<String>,
    session: Option<Session>,
}

impl TcpClient {
    /// Create a disconnected client
    #[must_use]
    pub fn new(config: ClientConfig, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            config,
            consumer,
            sink: Arc::new(TracingSink),
            state: ClientState::Disconnected,
            address: None,
            session: None,
        }
    }

    /// Report notices to `sink` instead of `tracing`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Connect to `address` (`host:port`)
    ///
    /// Every resolved address is tried in turn. `timeout` bounds the whole
    /// attempt; `Duration::ZERO` leaves it to the operating system.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::AlreadyStarted`] while connected
    /// - [`NetworkError::InvalidSettings`] if the configuration does not validate
    /// - [`NetworkError::Connect`] if resolution or every attempt failed
    pub async fn connect(&mut self, address: &str, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Err(NetworkError::AlreadyStarted);
        }
        self.config.validate()?;
        self.finish_session().await;

        self.state = ClientState::Connecting;
        self.connect_internal(address, timeout).await
    }

    async fn connect_internal(&mut self, address: &str, timeout: Duration) -> Result<()> {
        let attempt = establish(address, timeout).await.and_then(|stream| {
            self.attach(stream)
                .map_err(|e| format!("failed to set up connection: {}", e))
        });

        match attempt {
            Ok(session) => {
                self.session = Some(session);
                self.address = Some(address.to_string());
                self.state = ClientState::Connected;
                Ok(())
            }
            Err(reason) => {
                self.state = ClientState::Disconnected;
                self.sink.notice(&Notice::ConnectFailed {
                    address: address.to_string(),
                    reason: reason.clone(),
                });
                Err(NetworkError::connect(address, reason))
            }
        }
    }

    fn attach(&self, stream: TcpStream) -> Result<Session> {
        if let Err(e) = configure_stream(&stream, &self.config.socket) {
            tracing::warn!("Failed to configure client socket: {}", e);
        }
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new(1));
        let pool = Arc::new(BufferPool::new(
            1,
            self.config.buffer_size,
            AcquirePolicy::FailFast,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connection, io) = registry.register(peer, local)?;

        // Sends are accepted as soon as connect returns; they queue until
        // the writer starts.
        connection.advance(ConnectionState::Connected);

        let transport = Transport {
            consumer: Arc::clone(&self.consumer),
            limiter: WriteLimiter::new(self.config.max_simultaneous_writes),
            sink: Arc::clone(&self.sink),
            shutdown: shutdown_rx,
            write_timeout: self.config.write_timeout,
        };
        let task = tokio::spawn(run_connection(
            Arc::clone(&connection),
            io,
            stream,
            registry,
            pool,
            transport,
        ));

        Ok(Session {
            connection,
            task,
            shutdown_tx,
        })
    }

    /// Queue `data` for sending
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`] before `connect` or after the
    /// connection closed.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        match &self.session {
            Some(session) => session.connection.send(data),
            None => Err(NetworkError::NotConnected),
        }
    }

    /// Close the connection
    ///
    /// Queued payloads are flushed first. Returns once the consumer has
    /// seen `Disconnected`. Closing a disconnected client is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            session.connection.close();
        }
        self.finish_session().await;
        self.state = ClientState::Disconnected;
        Ok(())
    }

    /// Wait for the current session's task, forcing it down if the flush
    /// takes too long
    async fn finish_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut session.task)
            .await
            .is_err()
        {
            session.shutdown_tx.send_replace(true);
            if let Err(e) = session.task.await {
                tracing::debug!("Client connection task ended abnormally: {}", e);
            }
        }
    }

    /// Reconnect with exponential backoff
    ///
    /// Closes the current connection if any, then makes up to
    /// `max_reconnect_attempts` attempts. The delay starts at 100ms and
    /// doubles after each failure, capped at 30s, plus random jitter.
    pub async fn reconnect(&mut self, address: &str, timeout: Duration) -> Result<()> {
        use rand::Rng;

        const MAX_DELAY_MS: u64 = 30_000;

        self.close().await?;
        self.config.validate()?;

        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let mut delay_ms = 100u64;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            self.state = ClientState::Reconnecting;
            tracing::info!(
                "Reconnection attempt {}/{} to {}",
                attempt,
                max_attempts,
                address
            );

            match self.connect_internal(address, timeout).await {
                Ok(()) => {
                    tracing::info!("Successfully reconnected to {}", address);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Reconnection attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let jitter = rand::thread_rng().gen_range(0..100);
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }

        self.state = ClientState::Disconnected;
        Err(last_error.unwrap_or_else(|| NetworkError::connect(address, "no attempts made")))
    }

    /// Current state
    ///
    /// A connection closed by the peer reports `Disconnected` even before
    /// `close` is called.
    #[must_use]
    pub fn state(&self) -> ClientState {
        match (&self.state, &self.session) {
            (ClientState::Connected, Some(session)) if !session.connection.is_alive() => {
                ClientState::Disconnected
            }
            (state, _) => *state,
        }
    }

    /// True while the connection accepts sends
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// The current connection, if any
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.session.as_ref().map(|s| Arc::clone(&s.connection))
    }

    /// Last address successfully connected to
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if session.connection.is_alive() {
                tracing::warn!("TcpClient dropped while connected - aborting connection");
            }
            session.shutdown_tx.send_replace(true);
            session.task.abort();
        }
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("state", &self.state())
            .field("address", &self.address)
            .field("connection", &self.session.as_ref().map(|s| s.connection.id()))
            .finish()
    }
}

/// Resolve `address` and connect to the first reachable candidate
async fn establish(address: &str, timeout: Duration) -> std::result::Result<TcpStream, String> {
    if timeout.is_zero() {
        return connect_any(address).await;
    }
    tokio::time::timeout(timeout, connect_any(address))
        .await
        .map_err(|_| format!("timed out after {:?}", timeout))?
}

async fn connect_any(address: &str) -> std::result::Result<TcpStream, String> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|e| format!("cannot resolve: {}", e))?
        .collect();

    let mut last_error = String::from("no addresses resolved");
    for candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = format!("{}: {}", candidate, e),
        }
    }
    Err(last_error)
}
