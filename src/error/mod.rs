//! Error types for the connection engine

use std::io;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Connection engine errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport error on an established connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Outbound connect attempt failed (refused, timed out, unresolvable)
    #[error("Failed to connect to {address}: {reason}")]
    Connect {
        /// Address as given by the caller
        address: String,
        /// Human readable failure reason
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Codec could not make sense of buffered bytes
    #[error("Decode error: {0}")]
    Decode(String),

    /// Address parse error
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Settings failed validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Message too large
    #[error("Message too large: {0} bytes (max: {1} bytes)")]
    MessageTooLarge(usize, usize),

    /// Connection registry is full
    #[error("Connection limit reached ({0})")]
    CapacityExceeded(usize),

    /// Buffer pool has no free buffer
    #[error("Buffer pool exhausted ({0} buffers in use)")]
    PoolExhausted(usize),

    /// Engine was started twice
    #[error("Engine is already started")]
    AlreadyStarted,

    /// Send attempted without an established connection
    #[error("Not connected")]
    NotConnected,

    /// A message handler is already registered for this identifier
    #[error("Handler for message id {0} is already registered")]
    DuplicateHandler(u32),

    /// Operation cancelled because the engine stopped
    #[error("Engine stopped")]
    Stopped,
}

impl NetworkError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a connect error
    pub fn connect<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        Self::Connect {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create an invalid settings error
    pub fn invalid_settings<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// True for errors raised by a codec or by framing limits
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::MessageTooLarge(..) | Self::Serialization(_)
        )
    }
}
