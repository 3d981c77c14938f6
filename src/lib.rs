//! Rust TCP Engine
//!
//! A TCP server/client connection engine for message-oriented services.
//!
//! ## Features
//!
//! - Async TCP server and client built on tokio, sharing one per-connection
//!   task structure
//! - Connection limit, pooled receive buffers and a fair cap on
//!   simultaneous writes
//! - Interchangeable consumers: direct callbacks, a single queued FIFO,
//!   codec-typed delivery and message dispatch by identifier
//! - Length-prefixed, fixed-size, JSON and identified-message codecs
//! - Socket tuning via `socket2` and JSON-loadable settings
//! - Structured notices forwarded to `tracing` or any injected sink
//!
//! ## Example
//!
//! ```no_run
//! use rust_tcp_engine::{ClientEvent, QueuedConsumer, Settings, TcpServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue: QueuedConsumer = QueuedConsumer::new();
//!     let mut server = TcpServer::new(&Settings::default(), Arc::new(queue.clone()));
//!     server.start("127.0.0.1:8080").await?;
//!
//!     while let Ok(event) = queue.pop().await {
//!         if let ClientEvent::ReceivedData(conn, data) = event {
//!             conn.send(data)?;
//!         }
//!     }
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod core;
pub mod error;
pub mod notice;
pub mod pooling;

// Re-export main types
pub use codec::{Codec, Decoded, FixedSizeCodec, JsonCodec, LengthPrefixedCodec, MessageCodec};
pub use connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
pub use consumer::{
    ClientEvent, Consumer, DecodeErrorPolicy, EventConsumer, GenericConsumer, LoggingConsumer,
    MessageConsumer, MessageDispatcher, MessageHandler, QueuedConsumer,
};
pub use core::{
    ClientConfig, ClientState, Message, ServerState, Settings, SocketSettings, TcpClient,
    TcpServer, MAX_MESSAGE_SIZE,
};
pub use error::{NetworkError, Result};
pub use notice::{Notice, NoticeSink, NullSink, TracingSink};
pub use pooling::{AcquirePolicy, BufferPool, WriteLimiter};
