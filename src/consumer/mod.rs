//! Consumers: how connection events reach the application
//!
//! The engine reports every connection's lifecycle and payloads to one
//! [`Consumer`]. Delivery strategies are consumers themselves and compose by
//! wrapping:
//!
//! - any `Consumer` impl (or an [`EventConsumer`] built from closures) is
//!   called directly on the connection's task
//! - [`QueuedConsumer`] funnels every event into one FIFO that the
//!   application drains at its own pace
//! - [`GenericConsumer`] reassembles typed values with a [`Codec`] before
//!   handing them to the consumer it wraps
//! - [`MessageDispatcher`] routes decoded [`Message`]s to registered
//!   [`MessageHandler`]s by identifier
//!
//! [`Codec`]: crate::codec::Codec
//! [`Message`]: crate::core::message::Message

mod dispatch;
mod event;
mod generic;
mod logging;
mod queued;

pub use dispatch::{MessageConsumer, MessageDispatcher, MessageHandler};
pub use event::EventConsumer;
pub use generic::{DecodeErrorPolicy, GenericConsumer};
pub use logging::LoggingConsumer;
pub use queued::{QueueStats, QueuedConsumer};

use crate::connection::Connection;
use crate::error::NetworkError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Receiver of connection events
///
/// For a given connection, `on_connected` is called exactly once before any
/// `on_received`, and `on_disconnected` exactly once after the last one.
/// Calls for one connection never overlap; calls for different connections
/// may run concurrently.
#[async_trait]
pub trait Consumer<T = Bytes>: Send + Sync
where
    T: Send + 'static,
{
    /// Connection established and registered
    async fn on_connected(&self, connection: &Arc<Connection>);

    /// Data received on a connection
    async fn on_received(&self, connection: &Arc<Connection>, data: T);

    /// Connection closed and unregistered
    async fn on_disconnected(&self, connection: &Arc<Connection>);

    /// Non-fatal error on a connection
    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        tracing::debug!("Connection {} error: {}", connection, error);
    }

    /// The engine this consumer is attached to has stopped
    fn on_stopped(&self) {}
}

#[async_trait]
impl<T, C> Consumer<T> for Arc<C>
where
    T: Send + 'static,
    C: Consumer<T> + ?Sized,
{
    async fn on_connected(&self, connection: &Arc<Connection>) {
        (**self).on_connected(connection).await;
    }

    async fn on_received(&self, connection: &Arc<Connection>, data: T) {
        (**self).on_received(connection, data).await;
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        (**self).on_disconnected(connection).await;
    }

    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        (**self).on_error(connection, error).await;
    }

    fn on_stopped(&self) {
        (**self).on_stopped();
    }
}

/// A connection event as seen by a queued consumer
#[derive(Debug, Clone)]
pub enum ClientEvent<T = Bytes> {
    Connected(Arc<Connection>),
    Disconnected(Arc<Connection>),
    ReceivedData(Arc<Connection>, T),
}

impl<T> ClientEvent<T> {
    /// The connection the event belongs to
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        match self {
            Self::Connected(c) | Self::Disconnected(c) | Self::ReceivedData(c, _) => c,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::connection::{Connection, ConnectionIo, ConnectionState};
    use std::net::SocketAddr;
    use std::sync::Arc;

    /// A connected handle with no socket behind it
    pub(crate) fn connection(id: u64) -> (Arc<Connection>, ConnectionIo) {
        let peer: SocketAddr = format!("127.0.0.1:{}", 40000 + id).parse().unwrap();
        let local: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (conn, io) = Connection::new(id, peer, local);
        conn.advance(ConnectionState::Connected);
        (conn, io)
    }
}
