//! Pending-request table for correlated messaging.
//!
//! Each outbound command registers a fresh request id and gets a
//! [`Waiter`]. The dispatcher resolves the waiter when the matching
//! response arrives. An entry is removed when it is resolved, when its
//! timeout fires, or when its waiter is dropped, whichever comes first.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ProviderError;

use super::protocol::SandboxMessage;

pub type Reply = Result<SandboxMessage, ProviderError>;

#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and the waiter for its response.
    pub fn register(&self) -> Waiter {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id.clone(), tx);
        Waiter {
            id,
            rx,
            table: self.clone(),
        }
    }

    /// Hand a reply to the waiter for `id`. Returns false when nobody is
    /// waiting (unknown id, timed out, or waiter dropped).
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        let sender = self.inner.lock().remove(id);
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Reject every waiter with `error`. Returns how many were pending.
    pub fn fail_all(&self, error: ProviderError) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Drop every entry; waiters observe a cancelled request.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.len();
        inner.clear();
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, id: &str) {
        self.inner.lock().remove(id);
    }
}

/// Caller side of one pending request.
pub struct Waiter {
    id: String,
    rx: oneshot::Receiver<Reply>,
    table: PendingRequests,
}

impl Waiter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, racing it against `timeout`.
    pub async fn wait(mut self, timeout: Duration, operation: &str) -> Reply {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ProviderError::Connection(format!(
                "{operation} cancelled before a response arrived"
            ))),
            Err(_) => Err(ProviderError::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.table.forget(&self.id);
    }
}
