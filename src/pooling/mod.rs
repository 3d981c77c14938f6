//! Bounded resources shared by all connections of an engine

pub mod buffer_pool;
pub mod write_limiter;

pub use buffer_pool::{AcquirePolicy, BufferPool, BufferPoolStats, PooledBuffer};
pub use write_limiter::{WriteLimiter, WritePermit};
