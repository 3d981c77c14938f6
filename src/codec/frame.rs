//! Raw byte framings

use super::{Codec, Decoded};
use crate::core::message::MAX_MESSAGE_SIZE;
use crate::error::{NetworkError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Units of a fixed number of bytes
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeCodec {
    size: usize,
}

impl FixedSizeCodec {
    /// Create a codec for `size`-byte units
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl Codec for FixedSizeCodec {
    type Item = Bytes;

    fn try_decode(&self, buf: &[u8]) -> Result<Decoded<Bytes>> {
        if buf.len() < self.size {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Item(
            Bytes::copy_from_slice(&buf[..self.size]),
            self.size,
        ))
    }

    fn encode(&self, item: &Bytes) -> Result<Bytes> {
        if item.len() != self.size {
            return Err(NetworkError::serialization(format!(
                "unit must be {} bytes, got {}",
                self.size,
                item.len()
            )));
        }
        Ok(item.clone())
    }
}

/// Length header size (4 bytes)
const LENGTH_HEADER_SIZE: usize = 4;

/// Frames prefixed with a big-endian `u32` length
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedCodec {
    max_frame_size: usize,
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl LengthPrefixedCodec {
    /// Create a codec with the default 16MB frame limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest accepted frame body
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Largest accepted frame body
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub(crate) fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>> {
        if buf.len() < LENGTH_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_size {
            return Err(NetworkError::MessageTooLarge(len, self.max_frame_size));
        }
        if buf.len() < LENGTH_HEADER_SIZE + len {
            return Ok(None);
        }
        Ok(Some(len))
    }

    pub(crate) fn frame(&self, body: &[u8]) -> Result<Bytes> {
        if body.len() > self.max_frame_size {
            return Err(NetworkError::MessageTooLarge(body.len(), self.max_frame_size));
        }
        let mut buf = BytesMut::with_capacity(LENGTH_HEADER_SIZE + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        Ok(buf.freeze())
    }
}

impl Codec for LengthPrefixedCodec {
    type Item = Bytes;

    fn try_decode(&self, buf: &[u8]) -> Result<Decoded<Bytes>> {
        match self.frame_len(buf)? {
            Some(len) => {
                let total = LENGTH_HEADER_SIZE + len;
                Ok(Decoded::Item(
                    Bytes::copy_from_slice(&buf[LENGTH_HEADER_SIZE..total]),
                    total,
                ))
            }
            None => Ok(Decoded::Incomplete),
        }
    }

    fn encode(&self, item: &Bytes) -> Result<Bytes> {
        self.frame(item)
    }
}
