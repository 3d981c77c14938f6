//! Client connecting with direct callbacks
//!
//! Run `echo_server` first, then `cargo run --example connection_demo`.

use bytes::Bytes;
use rust_tcp_engine::{ClientConfig, EventConsumer, TcpClient};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let consumer = EventConsumer::<Bytes>::new()
        .with_connected(|conn| println!("Connected to {}", conn.peer_addr()))
        .with_received(|_conn, data| {
            println!("Received: {}", String::from_utf8_lossy(&data));
        })
        .with_disconnected(|conn| println!("Disconnected after {:?}", conn.uptime()));

    let config = ClientConfig::new().with_max_reconnect_attempts(5);
    let mut client = TcpClient::new(config, Arc::new(consumer));

    println!("Connecting to server...");
    client
        .reconnect("127.0.0.1:8080", Duration::from_secs(5))
        .await?;

    for i in 1..=5 {
        let line = format!("Hello from client! Message #{}", i);
        println!("Sending: {}", line);
        client.send(line)?;

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("Disconnecting...");
    client.close().await?;

    println!("Done!");

    Ok(())
}
