//! Engine settings

use crate::core::socket::SocketSettings;
use crate::error::{NetworkError, Result};
use crate::pooling::AcquirePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server engine configuration
///
/// A running [`TcpServer`](crate::TcpServer) works on its own copy, so
/// changing a `Settings` value after handing it over has no effect on the
/// engine. `clone()` is a full deep copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Size of each receive buffer in bytes
    pub buffer_size: usize,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum writes in flight across all connections
    pub max_simultaneous_writes: usize,
    /// What a connection does when no receive buffer is free
    pub pool_policy: AcquirePolicy,
    /// Longest a single write may hold a write slot before its connection
    /// is closed
    pub write_timeout: Duration,
    /// How long `stop()` waits for connections to wind down before aborting them
    pub shutdown_timeout: Duration,
    /// Socket options
    pub socket: SocketSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_size: 2000,
            max_connections: 100,
            max_simultaneous_writes: 100,
            pool_policy: AcquirePolicy::Wait,
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            socket: SocketSettings::default(),
        }
    }
}

impl Settings {
    /// Create default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive buffer size
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set maximum connections
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set maximum simultaneous writes
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_simultaneous_writes(mut self, max: usize) -> Self {
        self.max_simultaneous_writes = max;
        self
    }

    /// Set buffer pool exhaustion policy
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_pool_policy(mut self, policy: AcquirePolicy) -> Self {
        self.pool_policy = policy;
        self
    }

    /// Set write timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set socket options
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_socket(mut self, socket: SocketSettings) -> Self {
        self.socket = socket;
        self
    }

    /// Check that every limit is positive
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(NetworkError::invalid_settings("buffer_size must be positive"));
        }
        if self.max_connections == 0 {
            return Err(NetworkError::invalid_settings(
                "max_connections must be positive",
            ));
        }
        if self.max_simultaneous_writes == 0 {
            return Err(NetworkError::invalid_settings(
                "max_simultaneous_writes must be positive",
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(NetworkError::invalid_settings(
                "write_timeout must be positive",
            ));
        }
        self.socket.validate()
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| NetworkError::serialization(format!("Invalid settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| NetworkError::serialization(format!("Settings serialization failed: {}", e)))
    }
}
