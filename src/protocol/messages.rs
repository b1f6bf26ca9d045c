//! Protocol message types for the chat service
//!
//! Requests carry a client-generated correlation id; the matching response
//! echoes it back. Chat pushes are uncorrelated and carry a freshly minted
//! id instead. Uses serde with an internal `kind` tag so each line is
//! self-describing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request from a chat client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Request {
    /// Authenticate this connection
    Login {
        id: String,
        username: String,
        password: String,
    },
    /// Register a new account; does not authenticate the connection
    SignUp {
        id: String,
        username: String,
        password: String,
    },
    /// Enter a room, leaving the current one if any
    JoinRoom {
        id: String,
        #[serde(rename = "roomName")]
        room_name: String,
    },
    /// Broadcast a message to the current room
    SendMessage { id: String, message: String },
}

impl Request {
    /// The correlation id this request was sent with
    pub fn id(&self) -> &str {
        match self {
            Request::Login { id, .. }
            | Request::SignUp { id, .. }
            | Request::JoinRoom { id, .. }
            | Request::SendMessage { id, .. } => id,
        }
    }
}

/// A message from the server to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Response {
    /// The request identified by `id` succeeded
    Success { id: String, message: String },
    /// The request identified by `id` was rejected
    Error { id: String, message: String },
    /// Uncorrelated push: a chat message broadcast to a room member
    ChatMessage {
        id: String,
        sender: String,
        room: String,
        content: String,
    },
}

impl Response {
    /// Create a success response echoing the request's correlation id
    pub fn success<I: Into<String>, M: Into<String>>(id: I, message: M) -> Self {
        Response::Success {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create an error response echoing the request's correlation id
    pub fn error<I: Into<String>, M: Into<String>>(id: I, message: M) -> Self {
        Response::Error {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a chat push with a freshly generated id
    pub fn chat_message(sender: &str, room: &str, content: &str) -> Self {
        Response::ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            room: room.to_string(),
            content: content.to_string(),
        }
    }

    /// The id carried by this message
    pub fn id(&self) -> &str {
        match self {
            Response::Success { id, .. }
            | Response::Error { id, .. }
            | Response::ChatMessage { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}
