//! Closure-built consumer for direct callbacks

use super::Consumer;
use crate::connection::Connection;
use crate::error::NetworkError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

type ConnectionCallback = Box<dyn Fn(&Arc<Connection>) + Send + Sync>;
type ReceiveCallback<T> = Box<dyn Fn(&Arc<Connection>, T) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&Arc<Connection>, &NetworkError) + Send + Sync>;

/// Direct-callback consumer assembled from closures
///
/// Callbacks run on the connection's own task, so they see each
/// connection's events in order. Unset callbacks ignore the event.
///
/// ```
/// use rust_tcp_engine::consumer::EventConsumer;
///
/// let consumer: EventConsumer = EventConsumer::new()
///     .with_connected(|conn| println!("{} connected", conn))
///     .with_received(|conn, data| {
///         let _ = conn.send(data);
///     });
/// ```
pub struct EventConsumer<T = Bytes> {
    connected: Option<ConnectionCallback>,
    received: Option<ReceiveCallback<T>>,
    disconnected: Option<ConnectionCallback>,
    error: Option<ErrorCallback>,
}

impl<T> Default for EventConsumer<T> {
    fn default() -> Self {
        Self {
            connected: None,
            received: None,
            disconnected: None,
            error: None,
        }
    }
}

impl<T> EventConsumer<T> {
    /// Create a consumer that ignores every event
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.connected = Some(Box::new(f));
        self
    }

    /// Set the receive callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, T) + Send + Sync + 'static,
    {
        self.received = Some(Box::new(f));
        self
    }

    /// Set the disconnect callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.disconnected = Some(Box::new(f));
        self
    }

    /// Set the error callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, &NetworkError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer<T> for EventConsumer<T> {
    async fn on_connected(&self, connection: &Arc<Connection>) {
        if let Some(f) = &self.connected {
            f(connection);
        }
    }

    async fn on_received(&self, connection: &Arc<Connection>, data: T) {
        if let Some(f) = &self.received {
            f(connection, data);
        }
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        if let Some(f) = &self.disconnected {
            f(connection);
        }
    }

    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        match &self.error {
            Some(f) => f(connection, error),
            None => tracing::debug!("Connection {} error: {}", connection, error),
        }
    }
}
