//! Routing of decoded messages to handlers by identifier

use super::{Consumer, GenericConsumer};
use crate::codec::MessageCodec;
use crate::connection::Connection;
use crate::core::message::Message;
use crate::error::{NetworkError, Result};
use crate::notice::{Notice, NoticeSink, TracingSink};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles one message identifier
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Identifier this handler serves
    fn id(&self) -> u32;

    /// Process a message received on `connection`
    async fn process(&self, connection: &Arc<Connection>, message: Message);

    /// Encode `message` in the dispatcher's wire form and queue it on
    /// `connection`
    fn reply(&self, connection: &Connection, message: &Message) -> Result<()> {
        connection.send(message.encode()?)
    }
}

/// The usual way to run a [`MessageDispatcher`] on an engine
pub type MessageConsumer = GenericConsumer<MessageCodec, MessageDispatcher>;

/// Consumer of [`Message`]s that routes each one to the handler registered
/// for its identifier
///
/// Messages with no registered handler are reported as
/// [`Notice::UnhandledMessage`] and dropped. Connect and disconnect events
/// go to the optional lifecycle consumer.
pub struct MessageDispatcher {
    handlers: RwLock<HashMap<u32, Arc<dyn MessageHandler>>>,
    lifecycle: Option<Arc<dyn Consumer<Message>>>,
    sink: Arc<dyn NoticeSink>,
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            lifecycle: None,
            sink: Arc::new(TracingSink),
        }
    }
}

impl MessageDispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward connect, disconnect and error events to `consumer`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_lifecycle(mut self, consumer: Arc<dyn Consumer<Message>>) -> Self {
        self.lifecycle = Some(consumer);
        self
    }

    /// Set the notice sink
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register a handler
    ///
    /// # Errors
    ///
    /// [`NetworkError::DuplicateHandler`] if a handler already serves the
    /// same identifier.
    pub fn register(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let id = handler.id();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&id) {
            return Err(NetworkError::DuplicateHandler(id));
        }
        handlers.insert(id, handler);
        Ok(())
    }

    /// Remove the handler for `id`
    pub fn unregister(&self, id: u32) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().remove(&id)
    }

    /// True if a handler serves `id`
    #[must_use]
    pub fn is_registered(&self, id: u32) -> bool {
        self.handlers.read().contains_key(&id)
    }

    /// Number of registered handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Wrap in a [`MessageCodec`] so the dispatcher can be attached to an
    /// engine; the codec reports decode failures to the same sink
    #[must_use]
    pub fn into_consumer(self) -> MessageConsumer {
        let sink = Arc::clone(&self.sink);
        GenericConsumer::new(MessageCodec::new(), self).with_sink(sink)
    }
}

#[async_trait]
impl Consumer<Message> for MessageDispatcher {
    async fn on_connected(&self, connection: &Arc<Connection>) {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.on_connected(connection).await;
        }
    }

    async fn on_received(&self, connection: &Arc<Connection>, message: Message) {
        let handler = self.handlers.read().get(&message.id()).cloned();
        match handler {
            Some(handler) => handler.process(connection, message).await,
            None => self.sink.notice(&Notice::UnhandledMessage {
                id: connection.id(),
                message_id: message.id(),
            }),
        }
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.on_disconnected(connection).await;
        }
    }

    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        match &self.lifecycle {
            Some(lifecycle) => lifecycle.on_error(connection, error).await,
            None => tracing::debug!("Connection {} error: {}", connection, error),
        }
    }

    fn on_stopped(&self) {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.on_stopped();
        }
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<u32> = self.handlers.read().keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("MessageDispatcher")
            .field("handlers", &ids)
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}
