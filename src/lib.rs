//! TCP chat service with a newline-delimited JSON protocol
//!
//! This library provides both halves of a room-based chat system: a server
//! that authenticates clients and fans messages out to room members, and a
//! client that pairs asynchronous responses with the requests that produced
//! them.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ChatClient, ClientEvent};
pub use error::{ChatError, Result};
pub use protocol::{Request, Response};
pub use server::ChatServer;

use std::net::SocketAddr;
use uuid::Uuid;

/// Generate a correlation id, unique within this client's lifetime
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Chat server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Server listen address
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4040".parse().unwrap(),
        }
    }
}

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// How long to wait for a response before synthesizing a timeout error
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4040".parse().unwrap(),
            connect_timeout_secs: 10,
            request_timeout_secs: 5,
        }
    }
}
