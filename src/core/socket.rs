//! Low-level socket options

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Socket-level options applied to listeners and established streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// IPv6 listeners also accept IPv4-mapped peers
    pub dual_stack: bool,
    /// Disable Nagle's algorithm
    pub no_delay: bool,
    /// Allow rebinding a recently used address
    pub reuse_address: bool,
    /// TCP keep-alive idle time
    pub keep_alive: Option<Duration>,
    /// SO_LINGER timeout
    pub linger: Option<Duration>,
    /// Kernel receive buffer size (None = OS default)
    pub recv_buffer_size: Option<usize>,
    /// Kernel send buffer size (None = OS default)
    pub send_buffer_size: Option<usize>,
    /// Listen backlog
    pub backlog: u32,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            dual_stack: true,
            no_delay: true,
            reuse_address: true,
            keep_alive: Some(Duration::from_secs(60)),
            linger: None,
            recv_buffer_size: None,
            send_buffer_size: None,
            backlog: 1024,
        }
    }
}

impl SocketSettings {
    /// Create default socket settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable dual-stack listening
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_dual_stack(mut self, enabled: bool) -> Self {
        self.dual_stack = enabled;
        self
    }

    /// Enable or disable TCP_NODELAY
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set keep-alive interval
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set SO_LINGER
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set kernel buffer sizes
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_buffer_sizes(mut self, recv: Option<usize>, send: Option<usize>) -> Self {
        self.recv_buffer_size = recv;
        self.send_buffer_size = send;
        self
    }

    /// Set listen backlog
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Check option values
    pub fn validate(&self) -> Result<()> {
        if self.backlog == 0 {
            return Err(NetworkError::invalid_settings("backlog must be positive"));
        }
        if self.recv_buffer_size == Some(0) || self.send_buffer_size == Some(0) {
            return Err(NetworkError::invalid_settings(
                "kernel buffer sizes must be positive when set",
            ));
        }
        Ok(())
    }
}

/// Create a non-blocking listener bound to `addr`
pub(crate) fn bind_listener(addr: SocketAddr, settings: &SocketSettings) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        if let Err(e) = socket.set_only_v6(!settings.dual_stack) {
            tracing::warn!("Failed to configure dual-stack listener: {}", e);
        }
    }
    socket.set_reuse_address(settings.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let backlog = i32::try_from(settings.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Apply per-stream options to an accepted or connected stream
pub(crate) fn configure_stream(stream: &TcpStream, settings: &SocketSettings) -> Result<()> {
    stream.set_nodelay(settings.no_delay)?;

    let socket = SockRef::from(stream);
    if let Some(keep_alive) = settings.keep_alive {
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(keep_alive))?;
    }
    if settings.linger.is_some() {
        socket.set_linger(settings.linger)?;
    }
    if let Some(size) = settings.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = settings.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    Ok(())
}
