//! Pending request table
//!
//! Maps request ids to single-use response slots. The reader loop completes
//! slots; callers remove their own slot on timeout. Once closed, every
//! outstanding slot fails with `ConnectionClosed` and new registrations are
//! refused, so no caller can wait on a dead pipe.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use super::error::McpError;

/// Outcome delivered to a waiting caller
pub(crate) type Outcome = Result<Value, McpError>;

#[derive(Default)]
struct Slots {
    waiting: HashMap<u64, oneshot::Sender<Outcome>>,
    closed: bool,
}

pub(crate) struct PendingRequests {
    server: String,
    slots: Mutex<Slots>,
}

impl PendingRequests {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Reserve a slot for `id`
    pub async fn register(&self, id: u64) -> Result<oneshot::Receiver<Outcome>, McpError> {
        let mut slots = self.slots.lock().await;
        if slots.closed {
            return Err(McpError::closed(&self.server));
        }
        let (tx, rx) = oneshot::channel();
        if slots.waiting.insert(id, tx).is_some() {
            // ids come from a monotonic counter, so this means a logic error upstream
            tracing::warn!("[{}] request id {} was still pending", self.server, id);
        }
        Ok(rx)
    }

    /// Deliver an outcome; returns false when nobody is waiting for `id`
    pub async fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let sender = self.slots.lock().await.waiting.remove(&id);
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("[{}] receiver for request {} dropped", self.server, id);
                }
                true
            }
            None => false,
        }
    }

    /// Forget a slot (timeout or failed write)
    pub async fn remove(&self, id: u64) {
        self.slots.lock().await.waiting.remove(&id);
    }

    /// Fail every outstanding slot and refuse new ones; returns how many were failed
    pub async fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock().await;
            slots.closed = true;
            slots.waiting.drain().collect()
        };

        let count = drained.len();
        for (id, tx) in drained {
            if tx.send(Err(McpError::closed(&self.server))).is_err() {
                tracing::debug!("[{}] receiver for request {} dropped", self.server, id);
            }
        }
        count
    }

    pub async fn is_closed(&self) -> bool {
        self.slots.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.waiting.len()
    }
}
