//! Framing for identified messages

use super::{Codec, Decoded};
use crate::core::message::{Message, MAX_MESSAGE_SIZE};
use crate::error::{NetworkError, Result};
use bytes::Bytes;

/// Codec for identified [`Message`]s
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_payload: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            max_payload: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageCodec {
    /// Create a codec with the default 16MB payload limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest accepted payload
    #[must_use]
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }
}

impl Codec for MessageCodec {
    type Item = Message;

    fn try_decode(&self, buf: &[u8]) -> Result<Decoded<Message>> {
        Ok(match Message::decode(buf, self.max_payload)? {
            Some((message, used)) => Decoded::Item(message, used),
            None => Decoded::Incomplete,
        })
    }

    fn encode(&self, item: &Message) -> Result<Bytes> {
        if item.size() > self.max_payload {
            return Err(NetworkError::MessageTooLarge(item.size(), self.max_payload));
        }
        item.encode()
    }
}
