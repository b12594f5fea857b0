//! Event vocabulary and dispatch.
//!
//! Three layers of events flow upward:
//! - [`ProviderEvent`] from an adapter to whoever registered a listener
//!   (normally the engine)
//! - [`EngineEvent`] from the engine to its listeners (normally the manager)
//! - [`AutomationEvent`] on the public notification bus
//!
//! Listener registries are synchronous observers; the public bus uses a
//! tokio broadcast channel for fan-out to any number of subscribers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::{ActionRequest, ActionResult, ProviderStatus, Session};

// =============================================================================
// Event Types
// =============================================================================

/// Events emitted by a backend adapter.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SessionStart {
        provider: String,
    },
    SessionEnd {
        provider: String,
        status: ProviderStatus,
    },
    BetPlaced {
        provider: String,
        request: ActionRequest,
    },
    BetResult {
        provider: String,
        result: ActionResult,
    },
    Error {
        provider: String,
        message: String,
    },
    /// The substrate went away without a `disconnect` call.
    Disconnected {
        provider: String,
        reason: String,
    },
}

impl ProviderEvent {
    pub fn provider(&self) -> &str {
        match self {
            ProviderEvent::SessionStart { provider }
            | ProviderEvent::SessionEnd { provider, .. }
            | ProviderEvent::BetPlaced { provider, .. }
            | ProviderEvent::BetResult { provider, .. }
            | ProviderEvent::Error { provider, .. }
            | ProviderEvent::Disconnected { provider, .. } => provider,
        }
    }
}

/// Events emitted by the execution engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started {
        provider: String,
        session_id: String,
    },
    Stopped {
        session: Option<Session>,
    },
    Paused,
    Resumed,
    ProviderSwitched {
        from: Option<String>,
        to: String,
    },
    BetCompleted {
        provider: String,
        result: ActionResult,
    },
    BetFailed {
        provider: String,
        attempt: u32,
        error: String,
    },
    Exhausted {
        attempts: u32,
        last_error: String,
    },
    /// Forwarded from the active provider.
    Provider(ProviderEvent),
}

/// Public notification vocabulary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    Started {
        provider: String,
        session_id: String,
    },
    Stopped {
        session: Option<Session>,
    },
    Paused,
    Resumed,
    ProviderSwitched {
        from: Option<String>,
        to: String,
    },
    ProviderConnected {
        provider: String,
    },
    ProviderDisconnected {
        provider: String,
        reason: String,
    },
    ProviderError {
        provider: String,
        message: String,
    },
    BetPlaced {
        provider: String,
        table_id: String,
        amount: Decimal,
    },
    BetCompleted {
        provider: String,
        result: ActionResult,
    },
    BetFailed {
        provider: String,
        attempt: u32,
        error: String,
    },
    BetRejected {
        reason: String,
    },
    RiskWarning {
        kind: String,
        percentage: f64,
        message: String,
    },
    SessionTerminated {
        reason: String,
        profit: Decimal,
    },
    ProvidersExhausted {
        attempts: u32,
        last_error: String,
    },
    ConfigUpdated,
}

impl AutomationEvent {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            AutomationEvent::Started { .. } => "started",
            AutomationEvent::Stopped { .. } => "stopped",
            AutomationEvent::Paused => "paused",
            AutomationEvent::Resumed => "resumed",
            AutomationEvent::ProviderSwitched { .. } => "provider_switched",
            AutomationEvent::ProviderConnected { .. } => "provider_connected",
            AutomationEvent::ProviderDisconnected { .. } => "provider_disconnected",
            AutomationEvent::ProviderError { .. } => "provider_error",
            AutomationEvent::BetPlaced { .. } => "bet_placed",
            AutomationEvent::BetCompleted { .. } => "bet_completed",
            AutomationEvent::BetFailed { .. } => "bet_failed",
            AutomationEvent::BetRejected { .. } => "bet_rejected",
            AutomationEvent::RiskWarning { .. } => "risk_warning",
            AutomationEvent::SessionTerminated { .. } => "session_terminated",
            AutomationEvent::ProvidersExhausted { .. } => "providers_exhausted",
            AutomationEvent::ConfigUpdated => "config_updated",
        }
    }

    /// Translate an engine event into the public vocabulary.
    ///
    /// Provider-level bet results are dropped here; the engine reports
    /// the same outcome as `BetCompleted`/`BetFailed`.
    pub fn from_engine(event: &EngineEvent) -> Option<Self> {
        let translated = match event {
            EngineEvent::Started {
                provider,
                session_id,
            } => AutomationEvent::Started {
                provider: provider.clone(),
                session_id: session_id.clone(),
            },
            EngineEvent::Stopped { session } => AutomationEvent::Stopped {
                session: session.clone(),
            },
            EngineEvent::Paused => AutomationEvent::Paused,
            EngineEvent::Resumed => AutomationEvent::Resumed,
            EngineEvent::ProviderSwitched { from, to } => AutomationEvent::ProviderSwitched {
                from: from.clone(),
                to: to.clone(),
            },
            EngineEvent::BetCompleted { provider, result } => AutomationEvent::BetCompleted {
                provider: provider.clone(),
                result: result.clone(),
            },
            EngineEvent::BetFailed {
                provider,
                attempt,
                error,
            } => AutomationEvent::BetFailed {
                provider: provider.clone(),
                attempt: *attempt,
                error: error.clone(),
            },
            EngineEvent::Exhausted {
                attempts,
                last_error,
            } => AutomationEvent::ProvidersExhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            EngineEvent::Provider(inner) => match inner {
                ProviderEvent::SessionStart { provider } => AutomationEvent::ProviderConnected {
                    provider: provider.clone(),
                },
                ProviderEvent::SessionEnd { provider, .. } => {
                    AutomationEvent::ProviderDisconnected {
                        provider: provider.clone(),
                        reason: "session ended".to_string(),
                    }
                }
                ProviderEvent::Disconnected { provider, reason } => {
                    AutomationEvent::ProviderDisconnected {
                        provider: provider.clone(),
                        reason: reason.clone(),
                    }
                }
                ProviderEvent::Error { provider, message } => AutomationEvent::ProviderError {
                    provider: provider.clone(),
                    message: message.clone(),
                },
                ProviderEvent::BetPlaced { provider, request } => AutomationEvent::BetPlaced {
                    provider: provider.clone(),
                    table_id: request.table_id.clone(),
                    amount: request.total_amount,
                },
                ProviderEvent::BetResult { .. } => return None,
            },
        };
        Some(translated)
    }
}

/// One message on the public bus.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub event: AutomationEvent,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: AutomationEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

// =============================================================================
// Listener registry
// =============================================================================

pub type ListenerId = u64;

/// A synchronous event callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub type ProviderListener = Listener<ProviderEvent>;
pub type EngineListener = Listener<EngineEvent>;

/// Observer registry. A panicking listener is logged and skipped; it
/// never reaches the emitter.
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Listener<E>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so listeners may add/remove listeners re-entrantly.
        let snapshot: Vec<Listener<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Event listener panicked, continuing");
            }
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Notification bus
// =============================================================================

/// Broadcast channel carrying [`Notification`]s to any number of subscribers.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: AutomationEvent) -> usize {
        self.sender.send(Notification::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> NotificationReceiver {
        NotificationReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Subscriber side of the [`NotificationBus`].
pub struct NotificationReceiver {
    receiver: broadcast::Receiver<Notification>,
}

impl NotificationReceiver {
    /// Receive the next notification.
    ///
    /// Returns `None` once the bus is dropped, and an error description
    /// when this receiver lagged behind.
    pub async fn recv(&mut self) -> Option<Result<Notification, String>> {
        match self.receiver.recv().await {
            Ok(n) => Some(Ok(n)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {count} notifications")))
            }
        }
    }

    /// Non-blocking receive. `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Result<Notification, String>> {
        match self.receiver.try_recv() {
            Ok(n) => Some(Ok(n)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {count} notifications")))
            }
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Some(item) = self.try_recv() {
            if let Ok(n) = item {
                out.push(n);
            }
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
