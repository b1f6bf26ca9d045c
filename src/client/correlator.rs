//! Request/response correlation for the chat client
//!
//! Requests go out on a streaming connection and responses come back in
//! whatever order the server produces them, interleaved with chat pushes.
//! The correlator pairs each response with the request that carried the
//! same correlation id, so callers can send-and-await over the shared
//! stream. Every wait is bounded: a request nobody answers times out,
//! resolves to a locally synthesized error, and leaves nothing behind in
//! the pending table.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::{Request, Response};

/// Pairs outgoing requests with their eventual response by correlation id
pub struct RequestCorrelator {
    /// Correlation id -> the single-resolution waiter for that request
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    outbound: mpsc::UnboundedSender<Request>,
    timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(outbound: mpsc::UnboundedSender<Request>, timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            outbound,
            timeout,
        }
    }

    /// Transmit a request and block until the matching response arrives or
    /// the timeout elapses. On timeout the pending entry is removed and a
    /// locally synthesized error response is returned; `Err` is reserved
    /// for a connection that is no longer usable.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let id = request.id().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.insert(id.clone(), tx).is_some() {
                warn!(id = %id, "correlation id reused while still in flight");
            }
        }

        if self.outbound.send(request).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ChatError::connection("connection closed"));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(ChatError::internal("pending request dropped"))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!(id = %id, "request timed out");
                Ok(Response::error(id, "Request timed out."))
            }
        }
    }

    /// Resolve the pending request matching this response, if any. A
    /// response with no pending entry (stale id, duplicate delivery) is
    /// silently discarded.
    pub async fn complete(&self, response: Response) {
        let waiter = self.pending.lock().await.remove(response.id());
        match waiter {
            Some(tx) => {
                // the waiter may have just timed out; nothing to do then
                let _ = tx.send(response);
            }
            None => {
                debug!(id = %response.id(), "dropping response with no pending request");
            }
        }
    }

    /// Number of in-flight requests
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
