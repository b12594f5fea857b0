//! Isolated execution context.
//!
//! A context is a spawned task running a bootstrap program. The host can
//! only reach it by posting serialized frames to its inbox; the program
//! answers through the shared window channel, and every frame it posts
//! is stamped with the context's origin.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::protocol::SandboxMessage;

/// Identity of one context instance, stamped on every frame it posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A frame posted to the host window.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: ContextId,
    pub body: String,
}

/// The program's view of the boundary.
pub struct ContextPort {
    origin: ContextId,
    inbox: mpsc::Receiver<String>,
    window: mpsc::Sender<Envelope>,
}

impl ContextPort {
    /// Next raw frame from the host. `None` once the host hangs up.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbox.recv().await
    }

    /// Post a message to the host. Returns false when the host is gone.
    pub async fn post(&self, message: &SandboxMessage) -> bool {
        let body = match message.encode() {
            Ok(body) => body,
            Err(_) => return false,
        };
        self.window
            .send(Envelope {
                origin: self.origin,
                body,
            })
            .await
            .is_ok()
    }
}

/// Code injected into a fresh context.
#[async_trait]
pub trait SandboxProgram: Send + 'static {
    async fn run(self: Box<Self>, port: ContextPort);
}

/// Host-side handle to a running context.
pub struct IsolatedContext {
    id: ContextId,
    inbox: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl IsolatedContext {
    /// Spawn `program` in a new context posting to `window`.
    ///
    /// The returned receiver completes when the program returns or
    /// panics.
    pub fn spawn(
        program: Box<dyn SandboxProgram>,
        window: mpsc::Sender<Envelope>,
        capacity: usize,
    ) -> (Self, oneshot::Receiver<()>) {
        let id = ContextId::new();
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity.max(1));
        let (exited_tx, exited_rx) = oneshot::channel();

        let port = ContextPort {
            origin: id,
            inbox: inbox_rx,
            window,
        };
        let task = tokio::spawn(async move {
            // exited_tx drops on panic or abort, which also completes the receiver.
            program.run(port).await;
            let _ = exited_tx.send(());
        });

        (
            Self {
                id,
                inbox: inbox_tx,
                task,
            },
            exited_rx,
        )
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn sender(&self) -> mpsc::Sender<String> {
        self.inbox.clone()
    }

    /// Kill the context's task.
    pub fn destroy(&self) {
        self.task.abort();
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        self.task.abort();
    }
}
