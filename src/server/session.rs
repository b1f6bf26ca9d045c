//! Per-connection session state machine
//!
//! Each accepted connection gets one session task. The task owns the read
//! half of the socket and decodes one JSON request per line; a companion
//! writer task owns the write half and drains the session's outbound
//! queue, so responses and room pushes from other tasks never contend for
//! the socket. A session moves from unauthenticated to authenticated to
//! in-a-room; an undecodable line, a transport failure, peer EOF, or
//! server shutdown all end the task through the same exactly-once cleanup
//! path.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::protocol::{Request, Response};
use crate::server::room_registry::{RoomMember, RoomRegistry, SessionId};
use crate::server::user_store::UserStore;

/// Server-side state for one live client connection
pub struct ClientSession {
    id: SessionId,
    users: Arc<UserStore>,
    rooms: Arc<RoomRegistry>,
    outbound: mpsc::UnboundedSender<Response>,
    username: Option<String>,
    current_room: Option<String>,
}

impl ClientSession {
    pub fn new(
        id: SessionId,
        users: Arc<UserStore>,
        rooms: Arc<RoomRegistry>,
        outbound: mpsc::UnboundedSender<Response>,
    ) -> Self {
        Self {
            id,
            users,
            rooms,
            outbound,
            username: None,
            current_room: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    /// Dispatch one decoded request
    pub async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Login {
                id,
                username,
                password,
            } => self.handle_login(id, username, password).await,
            Request::SignUp {
                id,
                username,
                password,
            } => self.handle_sign_up(id, username, password).await,
            Request::JoinRoom { id, room_name } => self.handle_join_room(id, room_name).await,
            Request::SendMessage { id, message } => self.handle_send_message(id, message).await,
        }
    }

    async fn handle_login(&mut self, id: String, username: String, password: String) {
        if self.username.is_some() {
            self.send(Response::error(id, "Already logged in."));
            return;
        }
        if self.users.is_connected(&username).await {
            self.send(Response::error(id, "Login failed - user already connected."));
            return;
        }
        if !self.users.credentials_valid(&username, &password).await {
            self.send(Response::error(id, "Login failed - invalid credentials."));
            return;
        }
        // two sessions can race past the checks above; the claim decides
        if !self.users.mark_connected(&username).await {
            self.send(Response::error(id, "Login failed - user already connected."));
            return;
        }

        info!(session = self.id, user = %username, "login successful");
        self.username = Some(username);
        self.send(Response::success(id, "Login successful."));
    }

    async fn handle_sign_up(&mut self, id: String, username: String, password: String) {
        if !self.users.add_user(&username, &password).await {
            self.send(Response::error(id, "Signup failed - user already exists."));
            return;
        }

        info!(session = self.id, user = %username, "new user signed up");
        self.send(Response::success(id, "Signup successful."));
    }

    async fn handle_join_room(&mut self, id: String, room_name: String) {
        if self.username.is_none() {
            self.send(Response::error(id, "You must be logged in to join a room."));
            return;
        }

        let username = self.username.clone().unwrap_or_default();
        let member = RoomMember::new(self.id, username, self.outbound.clone());
        // the registry moves us out of the previous room, if any
        self.rooms.join(&room_name, member).await;
        self.current_room = Some(room_name.clone());

        debug!(session = self.id, room = %room_name, "joined room");
        self.send(Response::success(id, format!("Joined room: {}", room_name)));
    }

    async fn handle_send_message(&mut self, id: String, message: String) {
        if self.username.is_none() {
            self.send(Response::error(
                id,
                "You must be logged in to send messages.",
            ));
            return;
        }
        let room_name = match &self.current_room {
            Some(room_name) => room_name.clone(),
            None => {
                self.send(Response::error(
                    id,
                    "You must be in a room to send messages.",
                ));
                return;
            }
        };

        self.rooms.broadcast(&room_name, &message, Some(self.id)).await;
        self.send(Response::success(id, "Message sent."));
    }

    /// Release everything this session holds: room membership and the
    /// account's connected slot. Idempotent, and run exactly once per
    /// connection regardless of which error path ended it.
    pub async fn disconnect(&mut self) {
        if let Some(room_name) = self.current_room.take() {
            self.rooms.leave(&room_name, self.id).await;
        }
        if let Some(username) = self.username.take() {
            self.users.mark_disconnected(&username).await;
            info!(session = self.id, user = %username, "session disconnected");
        }
    }

    fn send(&self, response: Response) {
        if self.outbound.send(response).is_err() {
            debug!(session = self.id, "outbound queue closed, dropping response");
        }
    }
}

/// Run one connection to completion: spawn the writer task, decode and
/// dispatch requests until the peer goes away or shutdown is requested,
/// then clean up.
pub async fn run(
    id: SessionId,
    stream: TcpStream,
    users: Arc<UserStore>,
    rooms: Arc<RoomRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        while let Some(response) = outbound_rx.recv().await {
            let mut line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    error!(session = id, error = %e, "failed to encode response");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                debug!(session = id, error = %e, "connection write failed");
                break;
            }
        }
    });

    let mut session = ClientSession::new(id, users, rooms, outbound_tx);
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(session = id, "closing connection for server shutdown");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Request>(line) {
                        Ok(request) => session.handle_request(request).await,
                        Err(e) => {
                            warn!(session = id, error = %e, "undecodable request, closing connection");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!(session = id, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(session = id, error = %e, "connection read failed");
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    // dropping the session drops the outbound sender, which ends the writer
    drop(session);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(
        id: SessionId,
        users: &Arc<UserStore>,
        rooms: &Arc<RoomRegistry>,
    ) -> (ClientSession, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ClientSession::new(id, Arc::clone(users), Arc::clone(rooms), tx),
            rx,
        )
    }

    fn expect_success(rx: &mut mpsc::UnboundedReceiver<Response>, id: &str) -> String {
        match rx.try_recv().unwrap() {
            Response::Success { id: got, message } => {
                assert_eq!(got, id);
                message
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    fn expect_error(rx: &mut mpsc::UnboundedReceiver<Response>, id: &str) -> String {
        match rx.try_recv().unwrap() {
            Response::Error { id: got, message } => {
                assert_eq!(got, id);
                message
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sign_up_then_login() {
        let users = Arc::new(UserStore::new());
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::SignUp {
                id: "r1".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r1");
        // signing up does not authenticate the session
        assert!(session.username().is_none());

        session
            .handle_request(Request::Login {
                id: "r2".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r2");
        assert_eq!(session.username(), Some("alice"));
        assert!(users.is_connected("alice").await);
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::Login {
                id: "r1".into(),
                username: "alice".into(),
                password: "wrong".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r1");
        assert!(message.contains("invalid credentials"));
        assert!(session.username().is_none());
        assert!(!users.is_connected("alice").await);
    }

    #[tokio::test]
    async fn test_second_login_for_connected_account_rejected() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut first, mut first_rx) = new_session(1, &users, &rooms);
        let (mut second, mut second_rx) = new_session(2, &users, &rooms);

        first
            .handle_request(Request::Login {
                id: "r1".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut first_rx, "r1");

        second
            .handle_request(Request::Login {
                id: "r2".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        let message = expect_error(&mut second_rx, "r2");
        assert!(message.contains("already connected"));

        // after the first session goes away the account is free again
        first.disconnect().await;
        second
            .handle_request(Request::Login {
                id: "r3".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut second_rx, "r3");
    }

    #[tokio::test]
    async fn test_relogin_on_authenticated_session_rejected() {
        let users = Arc::new(UserStore::with_users([("alice", "secret"), ("bob", "pw")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::Login {
                id: "r1".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r1");

        session
            .handle_request(Request::Login {
                id: "r2".into(),
                username: "bob".into(),
                password: "pw".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r2");
        assert!(message.contains("Already logged in"));
        // identity is unchanged and bob's slot was never claimed
        assert_eq!(session.username(), Some("alice"));
        assert!(!users.is_connected("bob").await);
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::SignUp {
                id: "r1".into(),
                username: "alice".into(),
                password: "other".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r1");
        assert!(message.contains("already exists"));
    }

    #[tokio::test]
    async fn test_join_room_requires_login() {
        let users = Arc::new(UserStore::new());
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::JoinRoom {
                id: "r1".into(),
                room_name: "general".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r1");
        assert!(message.contains("logged in"));
        assert!(!rooms.contains_room("general").await);
    }

    #[tokio::test]
    async fn test_join_switches_rooms() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::Login {
                id: "r1".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r1");

        session
            .handle_request(Request::JoinRoom {
                id: "r2".into(),
                room_name: "room-a".into(),
            })
            .await;
        assert_eq!(expect_success(&mut rx, "r2"), "Joined room: room-a");
        assert_eq!(session.current_room(), Some("room-a"));

        session
            .handle_request(Request::JoinRoom {
                id: "r3".into(),
                room_name: "room-b".into(),
            })
            .await;
        expect_success(&mut rx, "r3");
        assert_eq!(session.current_room(), Some("room-b"));
        assert!(!rooms.contains_room("room-a").await);
        assert_eq!(rooms.member_count("room-b").await, 1);
    }

    #[tokio::test]
    async fn test_send_message_requires_room() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::SendMessage {
                id: "r1".into(),
                message: "hello".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r1");
        assert!(message.contains("logged in"));

        session
            .handle_request(Request::Login {
                id: "r2".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r2");

        session
            .handle_request(Request::SendMessage {
                id: "r3".into(),
                message: "hello".into(),
            })
            .await;
        let message = expect_error(&mut rx, "r3");
        assert!(message.contains("in a room"));
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_message_broadcasts_to_other_members() {
        let users = Arc::new(UserStore::with_users([("alice", "a"), ("bob", "b")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut alice, mut alice_rx) = new_session(1, &users, &rooms);
        let (mut bob, mut bob_rx) = new_session(2, &users, &rooms);

        for (session, rx, user, pw) in [
            (&mut alice, &mut alice_rx, "alice", "a"),
            (&mut bob, &mut bob_rx, "bob", "b"),
        ] {
            session
                .handle_request(Request::Login {
                    id: "login".into(),
                    username: user.into(),
                    password: pw.into(),
                })
                .await;
            expect_success(rx, "login");
            session
                .handle_request(Request::JoinRoom {
                    id: "join".into(),
                    room_name: "general".into(),
                })
                .await;
            expect_success(rx, "join");
        }

        alice
            .handle_request(Request::SendMessage {
                id: "r1".into(),
                message: "hi bob".into(),
            })
            .await;

        // the sender gets the confirmation, never its own push
        assert_eq!(expect_success(&mut alice_rx, "r1"), "Message sent.");
        assert!(alice_rx.try_recv().is_err());

        match bob_rx.try_recv().unwrap() {
            Response::ChatMessage {
                sender,
                room,
                content,
                ..
            } => {
                assert_eq!(sender, "alice");
                assert_eq!(room, "general");
                assert_eq!(content, "hi bob");
            }
            other => panic!("expected chat push, got {:?}", other),
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_exactly_once() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());
        let (mut session, mut rx) = new_session(1, &users, &rooms);

        session
            .handle_request(Request::Login {
                id: "r1".into(),
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;
        expect_success(&mut rx, "r1");
        session
            .handle_request(Request::JoinRoom {
                id: "r2".into(),
                room_name: "general".into(),
            })
            .await;
        expect_success(&mut rx, "r2");

        session.disconnect().await;
        assert!(!rooms.contains_room("general").await);
        assert!(!users.is_connected("alice").await);

        // a second pass has nothing left to release
        session.disconnect().await;
        assert!(!rooms.contains_room("general").await);
    }

    #[tokio::test]
    async fn test_repeated_connect_join_disconnect_cycles() {
        let users = Arc::new(UserStore::with_users([("alice", "secret")]));
        let rooms = Arc::new(RoomRegistry::new());

        for cycle in 0..5 {
            let (mut session, mut rx) = new_session(cycle, &users, &rooms);
            session
                .handle_request(Request::Login {
                    id: "r1".into(),
                    username: "alice".into(),
                    password: "secret".into(),
                })
                .await;
            expect_success(&mut rx, "r1");
            session
                .handle_request(Request::JoinRoom {
                    id: "r2".into(),
                    room_name: "general".into(),
                })
                .await;
            expect_success(&mut rx, "r2");
            assert_eq!(rooms.member_count("general").await, 1);

            session.disconnect().await;
            assert_eq!(rooms.member_count("general").await, 0);
            assert!(!users.is_connected("alice").await);
        }
    }
}
