//! Room membership and broadcast fan-out
//!
//! Rooms are created lazily on first join and removed when the last member
//! leaves. Members are keyed by their stable session id, never by object
//! identity, and a session is a member of at most one room at a time.
//! Broadcast snapshots the membership before sending, so fan-out never
//! holds a lock while delivering and never races a concurrent join/leave.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::Response;

/// Stable opaque identifier assigned to each session at accept time
pub type SessionId = u64;

/// A room member's delivery handle
///
/// The outbound channel feeds the member's writer task; sending never
/// blocks, and a closed channel means the peer is gone.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub session_id: SessionId,
    pub username: String,
    pub outbound: mpsc::UnboundedSender<Response>,
}

impl RoomMember {
    pub fn new(
        session_id: SessionId,
        username: String,
        outbound: mpsc::UnboundedSender<Response>,
    ) -> Self {
        Self {
            session_id,
            username,
            outbound,
        }
    }
}

/// Registry of all rooms and their members
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Room name -> members keyed by session id
    rooms: RwLock<HashMap<String, HashMap<SessionId, RoomMember>>>,
    /// Session id -> room name, for the one-room-per-session invariant
    member_rooms: RwLock<HashMap<SessionId, String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a room, creating the room if absent. If the session
    /// was already in a different room it is removed from that room first,
    /// and the vacated room is deleted if it became empty.
    pub async fn join(&self, room_name: &str, member: RoomMember) {
        let session_id = member.session_id;
        let previous = {
            let mut index = self.member_rooms.write().await;
            index.insert(session_id, room_name.to_string())
        };

        let mut rooms = self.rooms.write().await;
        if let Some(previous) = previous {
            if previous != room_name {
                if let Some(members) = rooms.get_mut(&previous) {
                    members.remove(&session_id);
                    if members.is_empty() {
                        rooms.remove(&previous);
                        debug!(room = %previous, "removed empty room");
                    }
                }
            }
        }
        rooms
            .entry(room_name.to_string())
            .or_default()
            .insert(session_id, member);
    }

    /// Remove a member from a room; the room is deleted when it becomes
    /// empty. Returns `true` if the member was present.
    pub async fn leave(&self, room_name: &str, session_id: SessionId) -> bool {
        {
            let mut index = self.member_rooms.write().await;
            if index.get(&session_id).map(String::as_str) == Some(room_name) {
                index.remove(&session_id);
            }
        }

        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_name) {
            Some(members) => {
                let removed = members.remove(&session_id).is_some();
                if members.is_empty() {
                    rooms.remove(room_name);
                    debug!(room = %room_name, "removed empty room");
                }
                removed
            }
            None => false,
        }
    }

    /// Deliver a chat push to every member of a room except `sender`.
    ///
    /// With `sender = None` (operator broadcast) every member receives the
    /// push, attributed to `"server"`. Delivery is best effort per
    /// recipient: a member whose connection died mid-broadcast is skipped,
    /// never aborting delivery to the rest. An unknown room is a no-op.
    /// Returns the number of members the push was delivered to.
    pub async fn broadcast(
        &self,
        room_name: &str,
        content: &str,
        sender: Option<SessionId>,
    ) -> usize {
        // snapshot under the read lock, deliver outside it
        let recipients: Vec<RoomMember> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room_name) {
                Some(members) => members.values().cloned().collect(),
                None => return 0,
            }
        };

        let sender_name = sender
            .and_then(|id| {
                recipients
                    .iter()
                    .find(|member| member.session_id == id)
                    .map(|member| member.username.clone())
            })
            .unwrap_or_else(|| "server".to_string());
        let push = Response::chat_message(&sender_name, room_name, content);

        let mut delivered = 0;
        for member in recipients {
            if Some(member.session_id) == sender {
                continue;
            }
            if member.outbound.send(push.clone()).is_err() {
                debug!(
                    session = member.session_id,
                    room = %room_name,
                    "dropping chat push for closed connection"
                );
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast to every existing room
    pub async fn broadcast_all(&self, content: &str, sender: Option<SessionId>) -> usize {
        let room_names: Vec<String> = self.rooms.read().await.keys().cloned().collect();

        let mut delivered = 0;
        for room_name in room_names {
            delivered += self.broadcast(&room_name, content, sender).await;
        }
        delivered
    }

    pub async fn contains_room(&self, room_name: &str) -> bool {
        self.rooms.read().await.contains_key(room_name)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Member count of a room; 0 for unknown rooms
    pub async fn member_count(&self, room_name: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}
