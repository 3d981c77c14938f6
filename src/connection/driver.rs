//! Per-connection tasks shared by the server and the client
//!
//! Every connection runs one reader task, which also delivers the
//! connection's notifications, and one writer task draining its send queue.

use super::{Connection, ConnectionIo, ConnectionRegistry, ConnectionState};
use crate::consumer::Consumer;
use crate::error::{NetworkError, Result};
use crate::notice::{Notice, NoticeSink};
use crate::pooling::{BufferPool, PooledBuffer, WriteLimiter};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Engine-wide collaborators handed to every connection task
#[derive(Clone)]
pub(crate) struct Transport {
    pub(crate) consumer: Arc<dyn Consumer>,
    pub(crate) limiter: WriteLimiter,
    pub(crate) sink: Arc<dyn NoticeSink>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) write_timeout: Duration,
}

/// Drive a registered connection from buffer checkout to its final
/// `Disconnected` notification
pub(crate) async fn run_connection(
    connection: Arc<Connection>,
    io: ConnectionIo,
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    transport: Transport,
) {
    let buffer = match acquire_buffer(&pool, transport.shutdown.clone()).await {
        Ok(buffer) => buffer,
        Err(e) => {
            registry.unregister(connection.id());
            connection.advance(ConnectionState::Closed);
            match e {
                NetworkError::PoolExhausted(capacity) => {
                    transport.sink.notice(&Notice::PoolExhausted {
                        peer: connection.peer_addr(),
                        capacity,
                    });
                }
                e => tracing::debug!(
                    "Dropping connection from {} before start: {}",
                    connection.peer_addr(),
                    e
                ),
            }
            return;
        }
    };

    drive(&connection, io, stream, buffer, &transport).await;

    registry.unregister(connection.id());
    connection.advance(ConnectionState::Closed);
    transport.sink.notice(&Notice::Disconnected {
        id: connection.id(),
        peer: connection.peer_addr(),
    });
    transport.consumer.on_disconnected(&connection).await;
}

async fn acquire_buffer(
    pool: &BufferPool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<PooledBuffer> {
    tokio::select! {
        biased;
        _ = signalled(&mut shutdown) => Err(NetworkError::Stopped),
        buffer = pool.acquire() => buffer,
    }
}

/// Resolve once the flag is raised or its sender is gone
pub(crate) async fn signalled(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|raised| *raised).await;
}

/// Announce the connection, pump reads until it ends, then wind down the
/// writer. The buffer is released before this returns.
async fn drive(
    connection: &Arc<Connection>,
    io: ConnectionIo,
    stream: TcpStream,
    mut buffer: PooledBuffer,
    transport: &Transport,
) {
    let ConnectionIo { outbound, close } = io;
    let (reader, writer) = stream.into_split();

    connection.advance(ConnectionState::Connected);
    transport.sink.notice(&Notice::Connected {
        id: connection.id(),
        peer: connection.peer_addr(),
    });
    transport.consumer.on_connected(connection).await;

    let writer_task = tokio::spawn(write_loop(
        Arc::clone(connection),
        writer,
        outbound,
        close.clone(),
        transport.clone(),
    ));

    read_loop(connection, reader, &mut buffer, close, transport).await;

    connection.close();
    if let Err(e) = writer_task.await {
        tracing::debug!("Writer for connection {} ended abnormally: {}", connection, e);
    }
    drop(buffer);
}

/// Read and deliver until the peer, a close request or engine shutdown
/// ends the connection
///
/// A delivery still blocked in the consumer when the engine shuts down is
/// abandoned so the final `Disconnected` can go out.
async fn read_loop(
    connection: &Arc<Connection>,
    mut reader: OwnedReadHalf,
    buffer: &mut PooledBuffer,
    mut close: watch::Receiver<bool>,
    transport: &Transport,
) {
    let mut shutdown = transport.shutdown.clone();

    loop {
        let result = tokio::select! {
            biased;
            _ = signalled(&mut shutdown) => break,
            _ = signalled(&mut close) => break,
            result = reader.read(&mut buffer[..]) => result,
        };

        match result {
            Ok(0) => {
                tracing::debug!("Connection {} closed by peer", connection);
                break;
            }
            Ok(n) => {
                connection.record_received(n);
                let data = Bytes::copy_from_slice(&buffer[..n]);
                tokio::select! {
                    biased;
                    _ = transport.consumer.on_received(connection, data) => {}
                    _ = signalled(&mut shutdown) => {
                        tracing::debug!("Dropping {} undelivered bytes from {} on shutdown", n, connection);
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Read failed on connection {}: {}", connection, e);
                break;
            }
        }
    }
}

/// Drain the send queue, one limiter slot per write
///
/// A close request flushes what is already queued; engine shutdown stops
/// immediately.
async fn write_loop(
    connection: Arc<Connection>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut close: watch::Receiver<bool>,
    transport: Transport,
) {
    let mut shutdown = transport.shutdown.clone();

    loop {
        tokio::select! {
            biased;
            _ = signalled(&mut shutdown) => break,
            data = outbound.recv() => {
                let Some(data) = data else { break };
                if let Err(e) = write_one(&connection, &mut writer, &transport, &mut shutdown, &data).await {
                    tracing::debug!("Write failed on connection {}: {}", connection, e);
                    connection.close();
                    break;
                }
            }
            _ = signalled(&mut close) => {
                while let Ok(data) = outbound.try_recv() {
                    if write_one(&connection, &mut writer, &transport, &mut shutdown, &data).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    connection.clear_pending();
    let _ = writer.shutdown().await;
}

/// Write one chunk while holding a limiter slot
///
/// The slot is held for at most `write_timeout`; a peer that stops reading
/// loses its connection instead of keeping the slot.
async fn write_one(
    connection: &Connection,
    writer: &mut OwnedWriteHalf,
    transport: &Transport,
    shutdown: &mut watch::Receiver<bool>,
    data: &[u8],
) -> Result<()> {
    let _permit = tokio::select! {
        biased;
        _ = signalled(shutdown) => return Err(NetworkError::Stopped),
        permit = transport.limiter.acquire() => permit?,
    };

    let written = tokio::select! {
        biased;
        _ = signalled(shutdown) => return Err(NetworkError::Stopped),
        written = timeout(transport.write_timeout, writer.write_all(data)) => written,
    };

    match written {
        Ok(Ok(())) => {
            connection.record_sent(data.len());
            Ok(())
        }
        Ok(Err(e)) => Err(NetworkError::connection(format!("Failed to write: {}", e))),
        Err(_) => {
            transport.sink.notice(&Notice::WriteTimedOut {
                id: connection.id(),
                timeout: transport.write_timeout,
            });
            Err(NetworkError::connection(format!(
                "Write timed out after {:?}",
                transport.write_timeout
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ClientEvent, QueuedConsumer};
    use crate::notice::NullSink;
    use crate::pooling::AcquirePolicy;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, client.unwrap())
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let (server_side, mut peer) = socket_pair().await;
        let registry = Arc::new(ConnectionRegistry::new(4));
        let pool = Arc::new(BufferPool::new(4, 64, AcquirePolicy::Wait));
        let queue = QueuedConsumer::<Bytes>::new();
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let (conn, io) = registry
            .register(
                server_side.peer_addr().unwrap(),
                server_side.local_addr().unwrap(),
            )
            .unwrap();
        let transport = Transport {
            consumer: Arc::new(queue.clone()),
            limiter: WriteLimiter::new(2),
            sink: Arc::new(NullSink),
            shutdown,
            write_timeout: Duration::from_secs(5),
        };
        let task = tokio::spawn(run_connection(
            Arc::clone(&conn),
            io,
            server_side,
            Arc::clone(&registry),
            Arc::clone(&pool),
            transport,
        ));

        assert!(matches!(queue.pop().await, Ok(ClientEvent::Connected(_))));
        assert_eq!(pool.stats().in_use, 1);

        peer.write_all(b"ping").await.unwrap();
        match queue.pop().await {
            Ok(ClientEvent::ReceivedData(_, data)) => assert_eq!(&data[..], b"ping"),
            other => panic!("unexpected event: {:?}", other),
        }

        conn.send(Bytes::from_static(b"pong")).unwrap();
        let mut reply = [0u8; 4];
        peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        drop(peer);
        assert!(matches!(queue.pop().await, Ok(ClientEvent::Disconnected(_))));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(registry.count(), 0);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(conn.bytes_sent(), 4);
        assert_eq!(conn.bytes_received(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_pool_never_reaches_consumer() {
        let (server_side, _peer) = socket_pair().await;
        let registry = Arc::new(ConnectionRegistry::new(4));
        let pool = Arc::new(BufferPool::new(1, 64, AcquirePolicy::FailFast));
        let _held = pool.try_acquire().unwrap();
        let queue = QueuedConsumer::<Bytes>::new();
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let (conn, io) = registry
            .register(
                server_side.peer_addr().unwrap(),
                server_side.local_addr().unwrap(),
            )
            .unwrap();
        let transport = Transport {
            consumer: Arc::new(queue.clone()),
            limiter: WriteLimiter::new(1),
            sink: Arc::new(NullSink),
            shutdown,
            write_timeout: Duration::from_secs(5),
        };
        run_connection(conn.clone(), io, server_side, registry.clone(), pool, transport).await;

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(registry.count(), 0);
        assert!(queue.try_pop().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stalled_write_gives_up_its_slot() {
        let (server_side, _peer) = socket_pair().await;
        let registry = Arc::new(ConnectionRegistry::new(4));
        let pool = Arc::new(BufferPool::new(4, 64, AcquirePolicy::Wait));
        let queue = QueuedConsumer::<Bytes>::new();
        let limiter = WriteLimiter::new(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let (conn, io) = registry
            .register(
                server_side.peer_addr().unwrap(),
                server_side.local_addr().unwrap(),
            )
            .unwrap();
        let transport = Transport {
            consumer: Arc::new(queue.clone()),
            limiter: limiter.clone(),
            sink: Arc::new(NullSink),
            shutdown,
            write_timeout: Duration::from_millis(100),
        };
        let task = tokio::spawn(run_connection(
            Arc::clone(&conn),
            io,
            server_side,
            registry,
            pool,
            transport,
        ));
        assert!(matches!(queue.pop().await, Ok(ClientEvent::Connected(_))));

        // The peer never reads, so this cannot complete
        conn.send(vec![0u8; 32 * 1024 * 1024]).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), queue.pop())
            .await
            .expect("Stalled write was never abandoned");
        assert!(matches!(event, Ok(ClientEvent::Disconnected(_))));
        task.await.unwrap();

        assert_eq!(limiter.outstanding(), 0);
        assert_eq!(conn.bytes_sent(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
