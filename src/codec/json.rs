//! Length-prefixed JSON documents

use super::{Codec, Decoded, LengthPrefixedCodec};
use crate::error::{NetworkError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Encodes `T` as a JSON document inside a length-prefixed frame
pub struct JsonCodec<T> {
    framing: LengthPrefixedCodec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a codec with the default frame limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_framing(LengthPrefixedCodec::new())
    }

    /// Create a codec with custom framing limits
    #[must_use]
    pub fn with_framing(framing: LengthPrefixedCodec) -> Self {
        Self {
            framing,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec")
            .field("max_frame_size", &self.framing.max_frame_size())
            .finish()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn try_decode(&self, buf: &[u8]) -> Result<Decoded<T>> {
        let Some(len) = self.framing.frame_len(buf)? else {
            return Ok(Decoded::Incomplete);
        };
        let total = 4 + len;
        let value = serde_json::from_slice(&buf[4..total])
            .map_err(|e| NetworkError::decode(format!("JSON deserialization failed: {}", e)))?;
        Ok(Decoded::Item(value, total))
    }

    fn encode(&self, item: &T) -> Result<Bytes> {
        let json = serde_json::to_vec(item).map_err(|e| {
            NetworkError::serialization(format!("JSON serialization failed: {}", e))
        })?;
        self.framing.frame(&json)
    }
}
