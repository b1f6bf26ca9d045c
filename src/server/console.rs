//! Operator console broadcast bridge
//!
//! Reads operator-entered lines and forwards them to the room registry.
//! A line like `@general the server restarts in 5 minutes` targets one
//! room; any other non-empty line goes to every room. Recipients see the
//! message attributed to `server`. The bridge holds no state of its own.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::server::room_registry::RoomRegistry;

/// A parsed operator line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Broadcast to a single room
    Room { room: String, text: String },
    /// Broadcast to every room
    All { text: String },
}

/// Parse one operator line. Returns `None` for blank lines and for a
/// room selector with nothing to say.
pub fn parse_line(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix('@') {
        let (room, text) = rest.split_once(char::is_whitespace)?;
        let text = text.trim();
        if room.is_empty() || text.is_empty() {
            return None;
        }
        return Some(ConsoleCommand::Room {
            room: room.to_string(),
            text: text.to_string(),
        });
    }

    Some(ConsoleCommand::All {
        text: line.to_string(),
    })
}

/// Forward operator input to the registry until the input closes or
/// shutdown is requested
pub async fn run<R>(reader: R, rooms: Arc<RoomRegistry>, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(ConsoleCommand::Room { room, text }) => {
                        let delivered = rooms.broadcast(&room, &text, None).await;
                        debug!(room = %room, delivered, "console broadcast");
                    }
                    Some(ConsoleCommand::All { text }) => {
                        let delivered = rooms.broadcast_all(&text, None).await;
                        debug!(delivered, "console broadcast to all rooms");
                    }
                    None => {}
                },
                Ok(None) | Err(_) => break,
            }
        }
    }
    info!("console bridge stopped");
}
