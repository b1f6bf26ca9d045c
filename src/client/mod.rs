//! Chat client implementation
//!
//! This module provides a client for connecting to the chat server,
//! sending correlated requests, and receiving real-time room pushes.

pub mod correlator;

pub use correlator::RequestCorrelator;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{ChatError, Result};
use crate::protocol::{Request, Response};
use crate::{generate_request_id, ClientConfig};

/// Events that the client can receive
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected to server
    Connected,
    /// Disconnected from server
    Disconnected(String),
    /// Received a chat message pushed to the current room
    MessageReceived {
        sender: String,
        room: String,
        content: String,
    },
}

/// Chat client over a newline-delimited JSON stream
pub struct ChatClient {
    config: ClientConfig,
    correlator: Option<Arc<RequestCorrelator>>,
    username: Mutex<Option<String>>,
}

impl ChatClient {
    /// Create a new chat client with the given configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            correlator: None,
            username: Mutex::new(None),
        }
    }

    /// Connect to the chat server and start the reader/writer tasks.
    /// Returns the event stream for pushes and lifecycle notifications.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("connecting to chat server at {}", self.config.server_addr);

        // drop any previous connection before opening a new one
        self.correlator = None;
        *self.username.lock().unwrap() = None;

        let stream = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            TcpStream::connect(self.config.server_addr),
        )
        .await
        .map_err(|_| ChatError::timeout("Connection timeout"))?;
        let stream = stream?;

        let (read_half, mut write_half) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let correlator = Arc::new(RequestCorrelator::new(
            request_tx,
            Duration::from_secs(self.config.request_timeout_secs),
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(ClientEvent::Connected);

        // writer task: owns the write half, drains the request queue
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let mut line = match serde_json::to_string(&request) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "failed to encode request");
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!(error = %e, "connection write failed");
                    break;
                }
            }
        });

        // reader task: pushes go to the event stream, everything else to
        // the correlator. Holds only a weak reference so dropping the
        // client tears the connection down.
        let correlator_weak = Arc::downgrade(&correlator);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Response>(line) {
                            Ok(Response::ChatMessage {
                                sender,
                                room,
                                content,
                                ..
                            }) => {
                                let _ = event_tx.send(ClientEvent::MessageReceived {
                                    sender,
                                    room,
                                    content,
                                });
                            }
                            Ok(response) => match correlator_weak.upgrade() {
                                Some(correlator) => correlator.complete(response).await,
                                None => break,
                            },
                            Err(e) => {
                                let _ = event_tx.send(ClientEvent::Disconnected(format!(
                                    "undecodable server message: {}",
                                    e
                                )));
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = event_tx.send(ClientEvent::Disconnected(
                            "connection closed by server".to_string(),
                        ));
                        break;
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected(format!("connection lost: {}", e)));
                        break;
                    }
                }
            }
        });

        self.correlator = Some(correlator);
        Ok(event_rx)
    }

    fn correlator(&self) -> Result<&Arc<RequestCorrelator>> {
        self.correlator
            .as_ref()
            .ok_or_else(|| ChatError::connection("Not connected to server"))
    }

    /// Send a raw request and await its correlated response
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        self.correlator()?.send(request).await
    }

    /// Register a new account; does not log this client in
    pub async fn sign_up(&self, username: &str, password: &str) -> Result<Response> {
        self.send_request(Request::SignUp {
            id: generate_request_id(),
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Authenticate this connection
    pub async fn login(&self, username: &str, password: &str) -> Result<Response> {
        let response = self
            .send_request(Request::Login {
                id: generate_request_id(),
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        if response.is_success() {
            *self.username.lock().unwrap() = Some(username.to_string());
        }
        Ok(response)
    }

    /// Join a room, leaving the current one if any
    pub async fn join_room(&self, room_name: &str) -> Result<Response> {
        self.send_request(Request::JoinRoom {
            id: generate_request_id(),
            room_name: room_name.to_string(),
        })
        .await
    }

    /// Send a chat message to the current room
    pub async fn send_chat(&self, message: &str) -> Result<Response> {
        self.send_request(Request::SendMessage {
            id: generate_request_id(),
            message: message.to_string(),
        })
        .await
    }

    /// The username this client logged in as, if any
    pub fn username(&self) -> Option<String> {
        self.username.lock().unwrap().clone()
    }

    /// Check if connected to server
    pub fn is_connected(&self) -> bool {
        self.correlator.is_some()
    }

    /// Drop the connection. The writer task stops once the request queue
    /// closes, which closes the socket and lets the server run its
    /// session cleanup.
    pub fn disconnect(&mut self) {
        if self.correlator.take().is_some() {
            info!("disconnected from chat server");
        }
        *self.username.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_starts_disconnected() {
        let client = ChatClient::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert!(client.username().is_none());
    }

    #[tokio::test]
    async fn test_requests_require_connection() {
        let client = ChatClient::new(ClientConfig::default());
        let result = client.sign_up("alice", "secret").await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let mut client = ChatClient::new(ClientConfig::default());
        client.disconnect();
        assert!(!client.is_connected());
    }
}
