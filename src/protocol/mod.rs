//! Wire protocol for the chat service
//!
//! Messages travel as UTF-8 text lines, one JSON-encoded message per line.
//! There is no other framing.

pub mod messages;

pub use messages::{Request, Response};
