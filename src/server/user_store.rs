//! Credential and connected-user store
//!
//! Authoritative mapping from username to password, plus the set of
//! accounts with a live session. Shared by every connection; mutations are
//! serialized behind write locks so concurrent sign-ups and logins cannot
//! race each other into duplicate users or double connections.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

/// User records and connected-account tracking
#[derive(Debug, Default)]
pub struct UserStore {
    /// Registered accounts, username -> password
    users: RwLock<HashMap<String, String>>,
    /// Accounts with an active session; at most one per username
    connected: RwLock<HashSet<String>>,
}

impl UserStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with accounts
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let users = users
            .into_iter()
            .map(|(name, password)| (name.into(), password.into()))
            .collect();
        Self {
            users: RwLock::new(users),
            connected: RwLock::new(HashSet::new()),
        }
    }

    /// Register a new account. Returns `false` without mutating anything if
    /// the username is already taken; the check and insert happen under one
    /// write lock so concurrent sign-ups cannot both win.
    pub async fn add_user(&self, username: &str, password: &str) -> bool {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return false;
        }
        users.insert(username.to_string(), password.to_string());
        true
    }

    /// Remove an account. Returns `true` if it existed.
    pub async fn remove_user(&self, username: &str) -> bool {
        self.users.write().await.remove(username).is_some()
    }

    pub async fn user_exists(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    /// Check a username/password pair; `false` for unknown users
    pub async fn credentials_valid(&self, username: &str, password: &str) -> bool {
        self.users
            .read()
            .await
            .get(username)
            .map(|stored| stored == password)
            .unwrap_or(false)
    }

    /// Claim the single active-session slot for an account. Returns `false`
    /// if the account is already connected.
    pub async fn mark_connected(&self, username: &str) -> bool {
        self.connected.write().await.insert(username.to_string())
    }

    /// Release an account's active-session slot
    pub async fn mark_disconnected(&self, username: &str) {
        self.connected.write().await.remove(username);
    }

    pub async fn is_connected(&self, username: &str) -> bool {
        self.connected.read().await.contains(username)
    }
}
