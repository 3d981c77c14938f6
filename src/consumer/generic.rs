//! Typed delivery through a codec

use super::Consumer;
use crate::codec::{Codec, FrameAssembler};
use crate::connection::{Connection, ConnectionId};
use crate::core::message::MAX_MESSAGE_SIZE;
use crate::error::{NetworkError, Result};
use crate::notice::{Notice, NoticeSink, TracingSink};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What to do with a connection whose bytes could not be decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorPolicy {
    /// Close the connection
    #[default]
    Close,
    /// Discard the buffered bytes and keep the connection open
    Continue,
}

/// Consumer that reassembles complete values with a [`Codec`] and hands
/// them to the consumer it wraps
///
/// Each connection gets its own [`FrameAssembler`], created on connect and
/// dropped on disconnect. Partial values are never delivered. `inner` can
/// be any consumer of the decoded type, including a
/// [`QueuedConsumer`](super::QueuedConsumer) or a
/// [`MessageDispatcher`](super::MessageDispatcher).
pub struct GenericConsumer<C: Codec, I> {
    codec: Arc<C>,
    inner: I,
    assemblers: Mutex<HashMap<ConnectionId, FrameAssembler<C>>>,
    policy: DecodeErrorPolicy,
    max_buffered: usize,
    sink: Arc<dyn NoticeSink>,
}

impl<C, I> GenericConsumer<C, I>
where
    C: Codec,
    I: Consumer<C::Item>,
{
    /// Wrap `inner` behind `codec`
    #[must_use]
    pub fn new(codec: C, inner: I) -> Self {
        Self {
            codec: Arc::new(codec),
            inner,
            assemblers: Mutex::new(HashMap::new()),
            policy: DecodeErrorPolicy::default(),
            max_buffered: MAX_MESSAGE_SIZE + 1024,
            sink: Arc::new(TracingSink),
        }
    }

    /// Set the decode error policy
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the most bytes a connection may buffer without completing a value
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    /// Set the notice sink
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The wrapped consumer
    #[must_use]
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// The codec
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Encode `item` and queue it on `connection`
    pub fn send(&self, connection: &Connection, item: &C::Item) -> Result<()> {
        let data = self.codec.encode(item)?;
        connection.send(data)
    }

    /// Bytes buffered for `id` that do not yet form a complete value
    #[must_use]
    pub fn buffered(&self, id: ConnectionId) -> usize {
        self.assemblers
            .lock()
            .get(&id)
            .map_or(0, FrameAssembler::buffered)
    }

    fn assembler(&self) -> FrameAssembler<C> {
        FrameAssembler::new(Arc::clone(&self.codec), self.max_buffered)
    }

    async fn handle_decode_error(&self, connection: &Arc<Connection>, error: NetworkError) {
        self.sink.notice(&Notice::DecodeError {
            id: connection.id(),
            reason: error.to_string(),
        });
        self.inner.on_error(connection, &error).await;

        if let Some(assembler) = self.assemblers.lock().get_mut(&connection.id()) {
            assembler.clear();
        }

        if self.policy == DecodeErrorPolicy::Close {
            connection.close();
        }
    }
}

#[async_trait]
impl<C, I> Consumer for GenericConsumer<C, I>
where
    C: Codec,
    I: Consumer<C::Item>,
{
    async fn on_connected(&self, connection: &Arc<Connection>) {
        self.assemblers
            .lock()
            .insert(connection.id(), self.assembler());
        self.inner.on_connected(connection).await;
    }

    async fn on_received(&self, connection: &Arc<Connection>, data: Bytes) {
        let (items, error) = {
            let mut assemblers = self.assemblers.lock();
            let assembler = assemblers
                .entry(connection.id())
                .or_insert_with(|| self.assembler());
            assembler.feed(&data)
        };

        for item in items {
            self.inner.on_received(connection, item).await;
        }

        if let Some(error) = error {
            self.handle_decode_error(connection, error).await;
        }
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.assemblers.lock().remove(&connection.id());
        self.inner.on_disconnected(connection).await;
    }

    async fn on_error(&self, connection: &Arc<Connection>, error: &NetworkError) {
        self.inner.on_error(connection, error).await;
    }

    fn on_stopped(&self) {
        self.assemblers.lock().clear();
        self.inner.on_stopped();
    }
}

impl<C: Codec + std::fmt::Debug, I> std::fmt::Debug for GenericConsumer<C, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericConsumer")
            .field("codec", &self.codec)
            .field("policy", &self.policy)
            .field("connections", &self.assemblers.lock().len())
            .finish()
    }
}
