//! Server-wide admission control for socket writes
//!
//! Every connection drains its own send queue through a single writer task,
//! and that task asks the limiter for a slot before each write. The
//! underlying semaphore hands out permits in request order, and a
//! connection never has more than one request queued, so under contention
//! slots rotate across connections round-robin and none is starved.

use crate::error::{NetworkError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of writes in flight across one engine instance
#[derive(Clone)]
pub struct WriteLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    granted: Arc<AtomicU64>,
}

/// A granted write slot; dropping it releases the slot
#[derive(Debug)]
pub struct WritePermit {
    _permit: OwnedSemaphorePermit,
}

impl WriteLimiter {
    /// Create a limiter allowing `capacity` simultaneous writes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            granted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take a slot if one is free right now
    #[must_use]
    pub fn try_acquire(&self) -> Option<WritePermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.granted.fetch_add(1, Ordering::Relaxed);
        Some(WritePermit { _permit: permit })
    }

    /// Wait for a slot in request order
    ///
    /// # Errors
    ///
    /// [`NetworkError::Stopped`] once the limiter has been closed.
    pub async fn acquire(&self) -> Result<WritePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| NetworkError::Stopped)?;
        self.granted.fetch_add(1, Ordering::Relaxed);
        Ok(WritePermit { _permit: permit })
    }

    /// Fail all pending and future acquisitions with `Stopped`
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Writes currently holding a slot
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Maximum simultaneous writes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total slots granted since creation
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for WriteLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLimiter")
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_respects_capacity() {
        let limiter = WriteLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.outstanding(), 2);

        drop(a);
        assert_eq!(limiter.outstanding(), 1);
        assert!(limiter.try_acquire().is_some());
        assert_eq!(limiter.granted(), 3);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let limiter = WriteLimiter::new(1);
        let _held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        limiter.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(NetworkError::Stopped)));
    }

    #[tokio::test]
    async fn test_busy_writer_cannot_starve_others() {
        let limiter = WriteLimiter::new(1);
        let grants = Arc::new(Mutex::new(Vec::new()));

        // One connection that always has more to write; each write takes a while
        let hog = {
            let limiter = limiter.clone();
            let grants = Arc::clone(&grants);
            tokio::spawn(async move {
                for _ in 0..40 {
                    let _slot = limiter.acquire().await.unwrap();
                    grants.lock().push(0usize);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;

        let others: Vec<_> = (1..=4usize)
            .map(|id| {
                let limiter = limiter.clone();
                let grants = Arc::clone(&grants);
                tokio::spawn(async move {
                    let requested_at = grants.lock().len();
                    let _slot = limiter.acquire().await.unwrap();
                    let mut grants = grants.lock();
                    grants.push(id);
                    let waited = grants.len() - requested_at;
                    drop(grants);
                    waited
                })
            })
            .collect();

        for task in others {
            let waited = task.await.unwrap();
            // Served after at most one grant per writer queued ahead
            assert!(waited <= 6, "writer waited {} grants", waited);
        }
        hog.await.unwrap();
        assert_eq!(grants.lock().len(), 44);
    }
}
