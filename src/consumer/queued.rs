//! Queued delivery: one FIFO for every connection's events

use super::{ClientEvent, Consumer};
use crate::connection::Connection;
use crate::error::{NetworkError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

struct QueueShared<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<ClientEvent<T>>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientEvent<T>>>,
    // One permit per data event the queue may still hold
    data_slots: Option<Arc<Semaphore>>,
    closed: AtomicBool,
    capacity: Option<usize>,
    depth: AtomicUsize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Events waiting to be popped
    pub depth: usize,
    /// Events accepted since creation
    pub enqueued: u64,
    /// Events popped since creation
    pub dequeued: u64,
    /// Bound on queued data events, if any
    pub capacity: Option<usize>,
}

/// Consumer that converts every notification into a [`ClientEvent`] on a
/// single FIFO shared by all connections
///
/// Events come out of [`pop`](Self::pop) in exactly the order they were
/// produced across every connection. Handles are cheap to clone; hand one
/// to the engine and keep one to drain the queue.
///
/// A [`bounded`](Self::bounded) queue applies backpressure to data: when
/// `capacity` data events are waiting, the producing connection stops
/// reading from its socket until one is popped. `Connected` and
/// `Disconnected` never wait for space, so a stopping engine can always
/// report every connection's end.
pub struct QueuedConsumer<T = Bytes> {
    shared: Arc<QueueShared<T>>,
}

impl<T> Clone for QueuedConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Default for QueuedConsumer<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: Send + 'static> QueuedConsumer<T> {
    /// Create an unbounded queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unbounded queue
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue holding at most `capacity` data events
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(QueueShared {
                sender: Mutex::new(Some(tx)),
                receiver: tokio::sync::Mutex::new(rx),
                data_slots: capacity.map(|c| Arc::new(Semaphore::new(c))),
                closed: AtomicBool::new(false),
                capacity,
                depth: AtomicUsize::new(0),
                enqueued: AtomicU64::new(0),
                dequeued: AtomicU64::new(0),
            }),
        }
    }

    /// Append an event; dropped if the queue is closed
    ///
    /// On a bounded queue a data event waits here for space.
    pub async fn push(&self, event: ClientEvent<T>) {
        let Some(sender) = self.shared.sender.lock().clone() else {
            tracing::trace!("Queue closed, dropping event for {}", event.connection());
            return;
        };

        let is_data = matches!(event, ClientEvent::ReceivedData(..));
        let slot = match &self.shared.data_slots {
            Some(slots) if is_data => match slots.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::trace!("Queue closed, dropping data for {}", event.connection());
                    return;
                }
            },
            _ => None,
        };

        self.shared.depth.fetch_add(1, Ordering::AcqRel);
        if sender.send(event).is_ok() {
            // Returned by `pop` when the event leaves the queue
            if let Some(permit) = slot {
                permit.forget();
            }
            self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Wait for the next event
    ///
    /// # Errors
    ///
    /// [`NetworkError::Stopped`] once the queue is closed and drained.
    pub async fn pop(&self) -> Result<ClientEvent<T>> {
        let event = self.shared.receiver.lock().await.recv().await;
        match event {
            Some(event) => {
                self.record_dequeue(&event);
                Ok(event)
            }
            None => Err(NetworkError::Stopped),
        }
    }

    /// Take the next event if one is ready
    ///
    /// Returns `Ok(None)` when the queue is empty or another task is
    /// currently popping.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Stopped`] once the queue is closed and drained.
    pub fn try_pop(&self) -> Result<Option<ClientEvent<T>>> {
        let Ok(mut receiver) = self.shared.receiver.try_lock() else {
            return Ok(None);
        };
        match receiver.try_recv() {
            Ok(event) => {
                self.record_dequeue(&event);
                Ok(Some(event))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(NetworkError::Stopped),
        }
    }

    fn record_dequeue(&self, event: &ClientEvent<T>) {
        if let (Some(slots), ClientEvent::ReceivedData(..)) = (&self.shared.data_slots, event) {
            slots.add_permits(1);
        }
        self.shared.depth.fetch_sub(1, Ordering::AcqRel);
        self.shared.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop accepting events
    ///
    /// Events already queued can still be popped; afterwards `pop` returns
    /// [`NetworkError::Stopped`]. Producers blocked on a full queue give up.
    pub fn close(&self) {
        self.shared.sender.lock().take();
        self.shared.closed.store(true, Ordering::Release);
        if let Some(slots) = &self.shared.data_slots {
            slots.close();
        }
    }

    /// True once [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Events waiting to be popped
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    /// True if no event is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            dequeued: self.shared.dequeued.load(Ordering::Relaxed),
            capacity: self.shared.capacity,
        }
    }

    /// Drain events into `target` until the queue is closed and empty
    pub async fn run(&self, target: &dyn Consumer<T>) {
        while let Ok(event) = self.pop().await {
            match event {
                ClientEvent::Connected(conn) => target.on_connected(&conn).await,
                ClientEvent::ReceivedData(conn, data) => target.on_received(&conn, data).await,
                ClientEvent::Disconnected(conn) => target.on_disconnected(&conn).await,
            }
        }
        target.on_stopped();
    }

    /// Spawn a worker task that runs [`run`](Self::run)
    pub fn spawn_worker(&self, target: Arc<dyn Consumer<T>>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(target.as_ref()).await })
    }
}

impl<T> std::fmt::Debug for QueuedConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedConsumer")
            .field("depth", &self.shared.depth.load(Ordering::Relaxed))
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer<T> for QueuedConsumer<T> {
    async fn on_connected(&self, connection: &Arc<Connection>) {
        self.push(ClientEvent::Connected(Arc::clone(connection))).await;
    }

    async fn on_received(&self, connection: &Arc<Connection>, data: T) {
        self.push(ClientEvent::ReceivedData(Arc::clone(connection), data))
            .await;
    }

    async fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.push(ClientEvent::Disconnected(Arc::clone(connection)))
            .await;
    }

    fn on_stopped(&self) {
        self.close();
    }
}
