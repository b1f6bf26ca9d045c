//! Chat server: connection supervisor and shared state
//!
//! The supervisor accepts connections forever, spawning one independent
//! session task per connection so a slow or failing client never blocks
//! acceptance or other sessions. The credential store and room registry
//! are explicitly constructed here and handed to each session by
//! reference; there is no ambient global state. On shutdown the accept
//! loop stops and every session is drained through its cleanup path.

pub mod console;
pub mod room_registry;
pub mod session;
pub mod user_store;

pub use room_registry::{RoomMember, RoomRegistry, SessionId};
pub use user_store::UserStore;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ServerConfig;

/// TCP chat server
pub struct ChatServer {
    listener: TcpListener,
    users: Arc<UserStore>,
    rooms: Arc<RoomRegistry>,
    shutdown_tx: watch::Sender<bool>,
    next_session_id: AtomicU64,
}

impl ChatServer {
    /// Bind the listen socket with fresh stores
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        Self::bind_with_state(
            config,
            Arc::new(UserStore::new()),
            Arc::new(RoomRegistry::new()),
        )
        .await
    }

    /// Bind the listen socket around existing stores (pre-seeded accounts,
    /// state shared with the console bridge or tests)
    pub async fn bind_with_state(
        config: &ServerConfig,
        users: Arc<UserStore>,
        rooms: Arc<RoomRegistry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            users,
            rooms,
            shutdown_tx,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// The address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn users(&self) -> Arc<UserStore> {
        Arc::clone(&self.users)
    }

    pub fn rooms(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.rooms)
    }

    /// A receiver that flips when shutdown is requested; used by the
    /// console bridge and anything else tied to the server's lifetime
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown: the accept loop stops and sessions close after
    /// finishing their cleanup
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Accept and serve connections until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("chat server listening on {}", self.local_addr()?);

        let mut sessions = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("shutdown requested, draining sessions");
                    break;
                }
                // reap finished session tasks as we go
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                        debug!(session = id, peer = %addr, "accepted connection");
                        sessions.spawn(session::run(
                            id,
                            stream,
                            Arc::clone(&self.users),
                            Arc::clone(&self.rooms),
                            self.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                }
            }
        }

        // let every in-flight session finish its cleanup
        while sessions.join_next().await.is_some() {}
        info!("chat server stopped");
        Ok(())
    }
}
