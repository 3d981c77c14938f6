//! Fixed-capacity pool of receive buffers

use crate::error::{NetworkError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Behaviour of [`BufferPool::acquire`] when every buffer is checked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquirePolicy {
    /// Suspend until a buffer is released or the pool is closed
    #[default]
    Wait,
    /// Fail immediately with [`NetworkError::PoolExhausted`]
    FailFast,
}

struct PoolShared {
    free: Mutex<Vec<Box<[u8]>>>,
    in_use: AtomicUsize,
    allocated: AtomicUsize,
    exhausted: AtomicU64,
}

/// Pool of `capacity` byte buffers of `buffer_size` bytes each
///
/// Buffers are allocated on first use and recycled afterwards, so the pool
/// never holds more than `capacity * buffer_size` bytes. A checked-out
/// buffer is returned, zeroed, when its [`PooledBuffer`] guard is dropped.
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    policy: AcquirePolicy,
    permits: Arc<Semaphore>,
    shared: Arc<PoolShared>,
}

/// Buffer checked out of a [`BufferPool`]
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    shared: Arc<PoolShared>,
    // Dropped after `Drop::drop` has put the buffer back on the free list
    _permit: OwnedSemaphorePermit,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Maximum number of buffers
    pub capacity: usize,
    /// Buffers currently checked out
    pub in_use: usize,
    /// Buffers allocated so far
    pub allocated: usize,
    /// Failed acquisitions due to exhaustion
    pub exhausted: u64,
}

impl BufferPool {
    /// Create a pool
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize, policy: AcquirePolicy) -> Self {
        Self {
            buffer_size,
            capacity,
            policy,
            permits: Arc::new(Semaphore::new(capacity)),
            shared: Arc::new(PoolShared {
                free: Mutex::new(Vec::with_capacity(capacity)),
                in_use: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    /// Check out a buffer according to the pool's [`AcquirePolicy`]
    ///
    /// # Errors
    ///
    /// - [`NetworkError::PoolExhausted`] under `FailFast` when no buffer is free
    /// - [`NetworkError::Stopped`] once the pool has been closed
    pub async fn acquire(&self) -> Result<PooledBuffer> {
        match self.policy {
            AcquirePolicy::FailFast => self.try_acquire(),
            AcquirePolicy::Wait => {
                let permit = Arc::clone(&self.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| NetworkError::Stopped)?;
                Ok(self.checkout(permit))
            }
        }
    }

    /// Check out a buffer without waiting
    pub fn try_acquire(&self) -> Result<PooledBuffer> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(self.checkout(permit)),
            Err(TryAcquireError::Closed) => Err(NetworkError::Stopped),
            Err(TryAcquireError::NoPermits) => {
                self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::PoolExhausted(self.capacity))
            }
        }
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> PooledBuffer {
        let recycled = self.shared.free.lock().pop();
        let data = recycled.unwrap_or_else(|| {
            self.shared.allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.buffer_size].into_boxed_slice()
        });
        self.shared.in_use.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            data: Some(data),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        }
    }

    /// Close the pool: pending and future acquisitions fail with `Stopped`.
    /// Outstanding buffers can still be released.
    pub fn close(&self) {
        self.permits.close();
    }

    /// True once [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Size of every buffer in bytes
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            capacity: self.capacity,
            in_use: self.shared.in_use.load(Ordering::Acquire),
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            exhausted: self.shared.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.fill(0);
            self.shared.free.lock().push(data);
        }
        self.shared.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
