//! Core networking components

pub mod client;
pub mod message;
pub mod server;
pub mod settings;
pub mod socket;

pub use client::{ClientConfig, ClientState, TcpClient};
pub use message::{Message, MAX_MESSAGE_SIZE};
pub use server::{ServerState, TcpServer};
pub use settings::Settings;
pub use socket::SocketSettings;
