//! Codec interface and per-connection frame assembly
//!
//! The engine itself imposes no framing. Typed consumers turn the raw byte
//! stream into values through a [`Codec`]; a [`FrameAssembler`] keeps the
//! bytes of a connection until the codec can decode a complete unit.

mod frame;
mod json;
mod message;

pub use frame::{FixedSizeCodec, LengthPrefixedCodec};
pub use json::JsonCodec;
pub use message::MessageCodec;

use crate::error::{NetworkError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;

/// Outcome of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A complete value and the number of bytes it used
    Item(T, usize),
    /// More bytes are needed
    Incomplete,
}

/// Converts between raw bytes and typed values
pub trait Codec: Send + Sync + 'static {
    /// Decoded value type
    type Item: Send + 'static;

    /// Try to decode one value from the front of `buf`
    fn try_decode(&self, buf: &[u8]) -> Result<Decoded<Self::Item>>;

    /// Encode a value to bytes
    fn encode(&self, item: &Self::Item) -> Result<Bytes>;
}

/// Accumulates one connection's bytes and yields complete values
pub struct FrameAssembler<C: Codec> {
    codec: Arc<C>,
    buffer: BytesMut,
    max_buffered: usize,
}

impl<C: Codec> FrameAssembler<C> {
    /// Create an assembler that gives up once `max_buffered` bytes are held
    /// without a complete value
    #[must_use]
    pub fn new(codec: Arc<C>, max_buffered: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete value, if any
    ///
    /// # Errors
    ///
    /// Propagates codec errors, rejects codecs that report an impossible
    /// consumed length, and fails with [`NetworkError::MessageTooLarge`]
    /// when the buffer outgrows `max_buffered` without a complete value.
    pub fn next_item(&mut self) -> Result<Option<C::Item>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.codec.try_decode(&self.buffer)? {
            Decoded::Item(item, consumed) => {
                if consumed == 0 || consumed > self.buffer.len() {
                    return Err(NetworkError::decode(format!(
                        "codec consumed {} of {} buffered bytes",
                        consumed,
                        self.buffer.len()
                    )));
                }
                self.buffer.advance(consumed);
                Ok(Some(item))
            }
            Decoded::Incomplete => {
                if self.buffer.len() > self.max_buffered {
                    return Err(NetworkError::MessageTooLarge(
                        self.buffer.len(),
                        self.max_buffered,
                    ));
                }
                Ok(None)
            }
        }
    }

    /// Push `data` and decode every complete value now available
    ///
    /// Values decoded before an error are returned alongside it.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<C::Item>, Option<NetworkError>) {
        self.push(data);
        let mut items = Vec::new();
        loop {
            match self.next_item() {
                Ok(Some(item)) => items.push(item),
                Ok(None) => return (items, None),
                Err(e) => return (items, Some(e)),
            }
        }
    }

    /// Bytes held that do not yet form a complete value
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_unit_yields_one_item() {
        let mut assembler = FrameAssembler::new(Arc::new(FixedSizeCodec::new(3)), 64);

        let (items, err) = assembler.feed(&[0x01, 0x02]);
        assert!(items.is_empty());
        assert!(err.is_none());
        assert_eq!(assembler.buffered(), 2);

        let (items, err) = assembler.feed(&[0x03]);
        assert!(err.is_none());
        assert_eq!(items, vec![Bytes::from_static(&[1, 2, 3])]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_multiple_units_in_one_read() {
        let mut assembler = FrameAssembler::new(Arc::new(FixedSizeCodec::new(2)), 64);
        let (items, err) = assembler.feed(&[1, 2, 3, 4, 5]);
        assert!(err.is_none());
        assert_eq!(items.len(), 2);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_overflow_without_complete_unit() {
        let mut assembler = FrameAssembler::new(Arc::new(FixedSizeCodec::new(100)), 8);
        let (items, err) = assembler.feed(&[0u8; 9]);
        assert!(items.is_empty());
        assert!(matches!(err, Some(NetworkError::MessageTooLarge(9, 8))));
    }

    struct ZeroLengthCodec;

    impl Codec for ZeroLengthCodec {
        type Item = ();

        fn try_decode(&self, _buf: &[u8]) -> Result<Decoded<()>> {
            Ok(Decoded::Item((), 0))
        }

        fn encode(&self, _item: &()) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    #[test]
    fn test_codec_consuming_nothing_is_rejected() {
        let mut assembler = FrameAssembler::new(Arc::new(ZeroLengthCodec), 8);
        let (items, err) = assembler.feed(b"x");
        assert!(items.is_empty());
        assert!(matches!(err, Some(NetworkError::Decode(_))));
    }

    #[test]
    fn test_items_before_error_are_kept() {
        let codec = Arc::new(LengthPrefixedCodec::new().with_max_frame_size(4));
        let mut assembler = FrameAssembler::new(codec, 64);

        let mut data = vec![0, 0, 0, 2, b'o', b'k'];
        data.extend_from_slice(&[0, 0, 0, 9]);
        let (items, err) = assembler.feed(&data);

        assert_eq!(items, vec![Bytes::from_static(b"ok")]);
        assert!(matches!(err, Some(NetworkError::MessageTooLarge(9, 4))));
    }
}
