//! Identified application messages

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NetworkError, Result};

/// Maximum message payload size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Message header size (4 bytes id + 4 bytes length)
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Application-level unit routed by its numeric identifier
///
/// Wire format: `id: u32 BE | length: u32 BE | payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u32,
    payload: Bytes,
}

impl Message {
    /// Create a message
    #[must_use]
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Create a message whose payload is the JSON encoding of `value`
    pub fn from_json<T: Serialize>(id: u32, value: &T) -> Result<Self> {
        let json = serde_json::to_vec(value).map_err(|e| {
            NetworkError::serialization(format!("JSON serialization failed: {}", e))
        })?;
        Ok(Self::new(id, json))
    }

    /// Deserialize the payload as JSON
    pub fn to_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| NetworkError::serialization(format!("JSON deserialization failed: {}", e)))
    }

    /// Message identifier
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Message payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload size
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Bytes> {
        let len = self.payload.len();
        if len > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
        }

        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + len);
        buf.put_u32(self.id);
        buf.put_u32(len as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one message from the front of `buf`
    ///
    /// Returns the message and the number of bytes it occupied, or `None`
    /// if `buf` does not yet hold a complete message.
    pub fn decode(buf: &[u8], max_size: usize) -> Result<Option<(Self, usize)>> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }

        let id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        if len > max_size {
            return Err(NetworkError::MessageTooLarge(len, max_size));
        }

        let total = MESSAGE_HEADER_SIZE + len;
        if buf.len() < total {
            return Ok(None);
        }

        let payload = Bytes::copy_from_slice(&buf[MESSAGE_HEADER_SIZE..total]);
        Ok(Some((Self { id, payload }, total)))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[id={}, {} bytes]", self.id, self.size())
    }
}
