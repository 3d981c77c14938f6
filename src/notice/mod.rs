//! Structured engine notices
//!
//! The engine reports noteworthy transitions (connects, refusals, decode
//! failures, ...) to an injected [`NoticeSink`]. The default sink forwards
//! them to `tracing`; the crate never installs a subscriber itself.

use crate::connection::ConnectionId;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// A structured observability event emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Server bound and accepting
    Listening { addr: SocketAddr },
    /// Connection registered and announced to the consumer
    Connected { id: ConnectionId, peer: SocketAddr },
    /// Connection closed and unregistered
    Disconnected { id: ConnectionId, peer: SocketAddr },
    /// Accepted socket refused because the registry is full
    CapacityRefused { peer: SocketAddr, max_connections: usize },
    /// No receive buffer could be checked out for a new connection
    PoolExhausted { peer: SocketAddr, capacity: usize },
    /// `accept()` itself failed
    AcceptFailed { reason: String },
    /// Client connect attempt failed
    ConnectFailed { address: String, reason: String },
    /// Codec rejected the bytes buffered for a connection
    DecodeError { id: ConnectionId, reason: String },
    /// A write stayed blocked past `write_timeout`; the connection is closed
    WriteTimedOut { id: ConnectionId, timeout: Duration },
    /// Decoded message had no registered handler
    UnhandledMessage { id: ConnectionId, message_id: u32 },
    /// Engine finished stopping
    Stopped { aborted: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { addr } => write!(f, "listening on {}", addr),
            Self::Connected { id, peer } => write!(f, "connection {} from {} connected", id, peer),
            Self::Disconnected { id, peer } => {
                write!(f, "connection {} from {} disconnected", id, peer)
            }
            Self::CapacityRefused {
                peer,
                max_connections,
            } => write!(
                f,
                "refused {}: connection limit ({}) reached",
                peer, max_connections
            ),
            Self::PoolExhausted { peer, capacity } => write!(
                f,
                "refused {}: buffer pool exhausted ({} buffers)",
                peer, capacity
            ),
            Self::AcceptFailed { reason } => write!(f, "accept failed: {}", reason),
            Self::ConnectFailed { address, reason } => {
                write!(f, "connect to {} failed: {}", address, reason)
            }
            Self::DecodeError { id, reason } => {
                write!(f, "decode error on connection {}: {}", id, reason)
            }
            Self::WriteTimedOut { id, timeout } => {
                write!(f, "write on connection {} timed out after {:?}", id, timeout)
            }
            Self::UnhandledMessage { id, message_id } => write!(
                f,
                "no handler for message id {} (connection {})",
                message_id, id
            ),
            Self::Stopped { aborted } => write!(f, "stopped ({} tasks aborted)", aborted),
        }
    }
}

/// Receiver of engine notices
pub trait NoticeSink: Send + Sync {
    /// Record one notice. Called from engine tasks; must not block.
    fn notice(&self, notice: &Notice);
}

/// Sink that emits every notice as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NoticeSink for TracingSink {
    fn notice(&self, notice: &Notice) {
        match notice {
            Notice::CapacityRefused { .. }
            | Notice::PoolExhausted { .. }
            | Notice::DecodeError { .. }
            | Notice::WriteTimedOut { .. }
            | Notice::ConnectFailed { .. } => tracing::warn!("{}", notice),
            Notice::AcceptFailed { .. } => tracing::error!("{}", notice),
            Notice::UnhandledMessage { .. } => tracing::debug!("{}", notice),
            Notice::Listening { .. }
            | Notice::Connected { .. }
            | Notice::Disconnected { .. }
            | Notice::Stopped { .. } => tracing::info!("{}", notice),
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NoticeSink for NullSink {
    fn notice(&self, _notice: &Notice) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_display() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let notice = Notice::CapacityRefused {
            peer,
            max_connections: 1,
        };
        assert_eq!(
            notice.to_string(),
            "refused 127.0.0.1:4000: connection limit (1) reached"
        );

        let notice = Notice::UnhandledMessage {
            id: 7,
            message_id: 42,
        };
        assert_eq!(notice.to_string(), "no handler for message id 42 (connection 7)");

        let notice = Notice::WriteTimedOut {
            id: 2,
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            notice.to_string(),
            "write on connection 2 timed out after 250ms"
        );
    }

    #[test]
    fn test_sinks_accept_every_notice() {
        let sinks: [&dyn NoticeSink; 2] = [&TracingSink, &NullSink];
        for sink in sinks {
            sink.notice(&Notice::Stopped { aborted: 0 });
            sink.notice(&Notice::AcceptFailed {
                reason: "too many open files".into(),
            });
        }
    }
}
