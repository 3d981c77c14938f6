use super::Consumer;
use crate::connection::Connection;
use crate::error::NetworkError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Consumer that logs every event and optionally forwards it
#[derive(Default)]
pub struct LoggingConsumer {
    inner: Option<Arc<dyn Consumer>>,
}

impl LoggingConsumer {
    /// Log only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log, then forward to `inner`
    #[must_use]
    pub fn wrap(inner: Arc<dyn Consumer>) -> Self {
        Self { inner: Some(inner) }
    }
}

#[async_trait]
impl Consumer for LoggingConsumer {
    async fn on_connected(&self, connection: &Arc<Connection>) {
        tracing::info!(
            "Connection {} from {} connected",
            connection.id(),
            connection.peer_addr()
        );
        if let Some(inner) = &self.inner {
            inner.on_connected(connection).await;
        }
    }

    async fn on_received(&self, connection: &Arc<Connection>, data: Bytes) {
        tracing::debug!(
            "Connection {} received {} bytes",
            connection.id(),
            data.len()
        );
        if let Some(inner) = &self.inner {
            inner.on_received(connection, data).await;
        }
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        tracing::info!(
            "Connection {} disconnected (uptime: {:?}, sent: {}, received: {})",
            connection.id(),
            connection.uptime(),
            connection.bytes_sent(),
            connection.bytes_received()
        );
        if let Some(inner) = &self.inner {
            inner.on_disconnected(connection).await;
        }
    }

    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        tracing::warn!("Connection {} error: {}", connection.id(), error);
        if let Some(inner) = &self.inner {
            inner.on_error(connection, error).await;
        }
    }

    fn on_stopped(&self) {
        tracing::info!("Engine stopped");
        if let Some(inner) = &self.inner {
            inner.on_stopped();
        }
    }
}
