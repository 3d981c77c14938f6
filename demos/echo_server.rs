//! Echo server driven by a queued consumer
//!
//! Usage: `cargo run --example echo_server [settings.json]`

use rust_tcp_engine::{ClientEvent, QueuedConsumer, Settings, TcpServer};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load settings from a JSON file if one was given
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_json(&std::fs::read_to_string(path)?)?,
        None => Settings::default().with_max_connections(100),
    };

    let queue: QueuedConsumer = QueuedConsumer::bounded(1024);
    let mut server = TcpServer::new(&settings, Arc::new(queue.clone()));

    println!("Starting echo server...");
    let addr = server.start("127.0.0.1:8080").await?;
    println!("Listening on {}. Press Ctrl+C to stop.", addr);

    let worker = tokio::spawn(async move {
        while let Ok(event) = queue.pop().await {
            match event {
                ClientEvent::Connected(conn) => println!("Client connected: {}", conn),
                ClientEvent::ReceivedData(conn, data) => {
                    println!(
                        "Connection {} received: {}",
                        conn.id(),
                        String::from_utf8_lossy(&data)
                    );
                    if let Err(e) = conn.send(data) {
                        eprintln!("Failed to send echo: {}", e);
                    }
                }
                ClientEvent::Disconnected(conn) => println!(
                    "Client disconnected: {} (uptime: {:?}, {} bytes in, {} bytes out)",
                    conn.id(),
                    conn.uptime(),
                    conn.bytes_received(),
                    conn.bytes_sent()
                ),
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    println!("\nShutting down...");
    server.stop().await?;
    worker.await?;

    println!("Server stopped.");

    Ok(())
}
