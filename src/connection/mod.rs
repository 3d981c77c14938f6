//! Connection handles and bookkeeping

pub(crate) mod driver;
pub mod registry;

pub use registry::ConnectionRegistry;

use crate::error::{NetworkError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Identity of a connection, unique among the live connections of one engine
pub type ConnectionId = u64;

/// Connection lifecycle state
///
/// States only ever move forward in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// One established TCP peer
///
/// The socket itself is owned by the connection's tasks; this handle carries
/// identity, state and the send path. Sending only enqueues: the payload is
/// written by the connection's writer task once it is granted a write slot,
/// so `send` never blocks and per-connection order is preserved.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    state: RwLock<ConnectionState>,
    outbound: mpsc::UnboundedSender<Bytes>,
    close_tx: watch::Sender<bool>,
    pending_writes: AtomicUsize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    created_at: Instant,
}

/// Task-side ends of a connection's channels
#[derive(Debug)]
pub(crate) struct ConnectionIo {
    pub(crate) outbound: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) close: watch::Receiver<bool>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> (Arc<Self>, ConnectionIo) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            state: RwLock::new(ConnectionState::Connecting),
            outbound: outbound_tx,
            close_tx,
            pending_writes: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            created_at: Instant::now(),
        });

        let io = ConnectionIo {
            outbound: outbound_rx,
            close: close_rx,
        };

        (connection, io)
    }

    /// Connection identity
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local endpoint
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Liveness flag: true while the connection accepts sends
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Time since the connection was accepted or established
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Payloads queued but not yet written
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending_writes.load(Ordering::Acquire)
    }

    /// Total bytes written to the socket
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes read from the socket
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Queue a payload for sending
    ///
    /// Fails with [`NetworkError::NotConnected`] once the connection is
    /// closing or closed. Empty payloads are accepted and ignored.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        if !self.is_alive() {
            return Err(NetworkError::NotConnected);
        }

        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        self.pending_writes.fetch_add(1, Ordering::AcqRel);
        self.outbound.send(data).map_err(|_| {
            self.pending_writes.fetch_sub(1, Ordering::AcqRel);
            NetworkError::NotConnected
        })
    }

    /// Request the connection to close
    ///
    /// Payloads queued before the call are still flushed. The consumer sees
    /// `on_disconnected` once the connection's tasks have wound down.
    pub fn close(&self) {
        self.advance(ConnectionState::Closing);
        self.close_tx.send_replace(true);
    }

    /// Move the state forward; returns false if `next` is not ahead of the
    /// current state
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        if next > *state {
            *state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        self.pending_writes.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn record_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn clear_pending(&self) {
        self.pending_writes.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("uptime", &self.uptime())
            .finish()
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.id, self.peer_addr)
    }
}
