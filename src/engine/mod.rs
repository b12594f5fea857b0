//! Execution engine: provider selection, retry/failover and bookkeeping.
//!
//! State machine:
//!
//! ```text
//! Idle → Starting → Running → Stopping → Idle
//!            │          │
//!            └──────────┴──→ Error (all providers exhausted)
//! ```
//!
//! Every public operation that touches providers serializes on one async
//! lock, so concurrent `execute` calls queue in arrival order. Session
//! and metrics live behind a short synchronous lock and are only handed
//! out as snapshots.

pub mod accountant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EngineListener, ListenerId, Listeners, ProviderEvent};
use crate::providers::{sort_by_priority, BettingProvider};
use crate::types::{
    ActionRequest, ActionResult, Credentials, Metrics, ProviderStatus, Session, SessionStatus,
};

use accountant::Accountant;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Error => write!(f, "error"),
        }
    }
}

/// Retry and selection policy.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Attempts per provider before failing over.
    pub max_retries: u32,
    /// Base of the linear back-off (`retry_delay × attempt`).
    pub retry_delay: Duration,
    /// Provider tried first at start, if registered.
    pub preferred_provider: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            preferred_provider: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct Shared {
    state: EngineState,
    active: Option<usize>,
    paused: bool,
    credentials: Option<Credentials>,
    session: Option<Session>,
    metrics: Metrics,
    started_at: Option<Instant>,
}

struct EngineInner {
    providers: Vec<Arc<dyn BettingProvider>>,
    options: RwLock<EngineOptions>,
    shared: Mutex<Shared>,
    ops: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    listeners: Listeners<EngineEvent>,
    provider_listeners: Mutex<Vec<(usize, ListenerId)>>,
    health: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// Clears the in-flight flag when an `execute` call ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        self.listeners.emit(&event);
    }

    fn provider_name(&self, idx: usize) -> String {
        self.providers[idx].name().to_string()
    }

    fn active_name(&self) -> Option<String> {
        let active = self.shared.lock().active;
        active.map(|idx| self.provider_name(idx))
    }

    /// Provider indices in start order: preferred first, then by priority.
    fn start_order(&self) -> Vec<usize> {
        let preferred = self.options.read().preferred_provider.clone();
        let mut order: Vec<usize> = (0..self.providers.len()).collect();
        if let Some(name) = preferred {
            if let Some(pos) = order
                .iter()
                .position(|&idx| self.providers[idx].name() == name)
            {
                let idx = order.remove(pos);
                order.insert(0, idx);
            }
        }
        order
    }

    fn on_provider_event(&self, event: &ProviderEvent) {
        self.emit(EngineEvent::Provider(event.clone()));

        let reason = match event {
            ProviderEvent::Disconnected { reason, .. } => reason.as_str(),
            ProviderEvent::Error { message, .. } => message.as_str(),
            _ => return,
        };

        let running = self.shared.lock().state == EngineState::Running;
        let is_active = self.active_name().as_deref() == Some(event.provider());
        if !running || !is_active || self.in_flight.load(Ordering::SeqCst) {
            return;
        }

        debug!(provider = %event.provider(), reason, "Active provider unhealthy, scheduling failover");
        if let Some(tx) = self.health.lock().as_ref() {
            let _ = tx.send(event.provider().to_string());
        }
    }

    fn record(&self, request: &ActionRequest, result: &ActionResult) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if let Some(session) = shared.session.as_mut() {
            Accountant::record(session, &mut shared.metrics, request, result);
        }
        if let Some(started) = shared.started_at {
            shared.metrics.uptime_ms = started.elapsed().as_millis() as u64;
        }
    }

    /// Disconnect the active provider and connect the next untried one.
    /// Must be called with the operation lock held.
    async fn failover(&self, tried: &mut HashSet<usize>) -> Option<usize> {
        let (current, credentials) = {
            let shared = self.shared.lock();
            (shared.active, shared.credentials.clone())
        };
        let from = current.map(|idx| self.provider_name(idx));

        if let Some(idx) = current {
            tried.insert(idx);
            self.providers[idx].disconnect().await;
        }
        self.shared.lock().active = None;

        let credentials = credentials?;
        for idx in 0..self.providers.len() {
            if !tried.insert(idx) {
                continue;
            }
            let provider = &self.providers[idx];
            if !provider.is_available() {
                debug!(provider = %provider.name(), "Skipping unavailable provider");
                continue;
            }
            match provider.connect(&credentials).await {
                Ok(()) => {
                    self.shared.lock().active = Some(idx);
                    let to = provider.name().to_string();
                    info!(from = ?from, to = %to, "Failed over to next provider");
                    self.emit(EngineEvent::ProviderSwitched { from, to });
                    return Some(idx);
                }
                Err(e) => warn!(provider = %provider.name(), error = %e, "Failover connect failed"),
            }
        }
        None
    }

    /// Unrecoverable: no provider left.
    fn enter_error(&self) {
        let mut shared = self.shared.lock();
        shared.state = EngineState::Error;
        shared.active = None;
        if let Some(session) = shared.session.as_mut() {
            session.status = SessionStatus::Error;
        }
    }

    /// Failover triggered by a provider event outside of `execute`.
    async fn self_heal(&self, provider: &str) {
        let _ops = self.ops.lock().await;
        {
            let shared = self.shared.lock();
            let active = shared.active.map(|idx| self.providers[idx].name());
            if shared.state != EngineState::Running || active != Some(provider) {
                return;
            }
        }

        warn!(provider, "Self-healing: replacing unhealthy provider");
        let mut tried = HashSet::new();
        if self.failover(&mut tried).await.is_none() {
            error!("Self-healing failed: no provider could be connected");
            self.enter_error();
            self.emit(EngineEvent::Exhausted {
                attempts: 0,
                last_error: format!("{provider} became unhealthy"),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(providers: Vec<Arc<dyn BettingProvider>>, options: EngineOptions) -> Self {
        let mut providers = providers;
        sort_by_priority(&mut providers);

        let inner = Arc::new(EngineInner {
            providers,
            options: RwLock::new(options),
            shared: Mutex::new(Shared {
                state: EngineState::Idle,
                active: None,
                paused: false,
                credentials: None,
                session: None,
                metrics: Metrics::default(),
                started_at: None,
            }),
            ops: tokio::sync::Mutex::new(()),
            in_flight: AtomicBool::new(false),
            listeners: Listeners::new(),
            provider_listeners: Mutex::new(Vec::new()),
            health: Mutex::new(None),
        });

        let mut registrations = Vec::with_capacity(inner.providers.len());
        for (idx, provider) in inner.providers.iter().enumerate() {
            let weak: Weak<EngineInner> = Arc::downgrade(&inner);
            let id = provider.add_listener(Arc::new(move |event: &ProviderEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_provider_event(event);
                }
            }));
            registrations.push((idx, id));
        }
        *inner.provider_listeners.lock() = registrations;

        Self { inner }
    }

    fn spawn_supervisor(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.inner.health.lock() = Some(tx);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(provider) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.self_heal(&provider).await;
            }
        });
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Open a session on the first provider that connects.
    pub async fn start(&self, credentials: Credentials) -> EngineResult<()> {
        let _ops = self.inner.ops.lock().await;

        {
            let mut shared = self.inner.shared.lock();
            if !matches!(shared.state, EngineState::Idle | EngineState::Error) {
                return Err(EngineError::AlreadyRunning);
            }
            if self.inner.providers.is_empty() {
                return Err(EngineError::NoProviders);
            }
            shared.state = EngineState::Starting;
            shared.active = None;
            shared.paused = false;
            shared.session = Some(Session::new());
            shared.credentials = Some(credentials.clone());
        }

        let mut failures = Vec::new();
        for idx in self.inner.start_order() {
            let provider = &self.inner.providers[idx];
            if !provider.is_available() {
                failures.push((provider.name().to_string(), "unavailable".to_string()));
                continue;
            }

            match provider.connect(&credentials).await {
                Ok(()) => {
                    let session_id = {
                        let mut shared = self.inner.shared.lock();
                        shared.active = Some(idx);
                        shared.state = EngineState::Running;
                        shared.started_at = Some(Instant::now());
                        shared
                            .session
                            .as_ref()
                            .map(|s| s.id.clone())
                            .unwrap_or_default()
                    };
                    self.spawn_supervisor();

                    info!(provider = %provider.name(), session = %session_id, "Engine started");
                    self.inner.emit(EngineEvent::Started {
                        provider: provider.name().to_string(),
                        session_id,
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "Provider failed to connect");
                    failures.push((provider.name().to_string(), e.to_string()));
                }
            }
        }

        {
            let mut shared = self.inner.shared.lock();
            shared.state = EngineState::Idle;
            shared.session = None;
            shared.credentials = None;
        }
        error!(failures = failures.len(), "No provider could be connected");
        Err(EngineError::AllProvidersFailed(failures))
    }

    /// Place one wager with retry and failover.
    pub async fn execute(&self, request: &ActionRequest) -> EngineResult<ActionResult> {
        request
            .validate()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        let _ops = self.inner.ops.lock().await;
        {
            let shared = self.inner.shared.lock();
            if shared.state != EngineState::Running {
                return Err(EngineError::NotRunning);
            }
            if shared.paused {
                return Err(EngineError::Paused);
            }
            if shared.active.is_none() {
                return Err(EngineError::NoActiveProvider);
            }
        }

        let _flight = InFlight::enter(&self.inner.in_flight);
        let (max_retries, retry_delay) = {
            let options = self.inner.options.read();
            (options.max_retries.max(1), options.retry_delay)
        };

        let mut tried = HashSet::new();
        let mut attempt: u32 = 0;
        let mut total_attempts: u32 = 0;
        let mut last_error = String::new();

        loop {
            let Some(idx) = self.inner.shared.lock().active else {
                break;
            };
            let provider = Arc::clone(&self.inner.providers[idx]);

            let result = match provider.execute(request).await {
                Ok(result) => result,
                Err(e) => ActionResult::failed(e.to_string(), 0),
            };
            total_attempts += 1;
            self.inner.record(request, &result);

            if result.success {
                self.inner.emit(EngineEvent::BetCompleted {
                    provider: provider.name().to_string(),
                    result: result.clone(),
                });
                return Ok(result);
            }

            attempt += 1;
            last_error = result.error.clone().unwrap_or_default();
            warn!(
                provider = %provider.name(),
                attempt,
                max_retries,
                error = %last_error,
                "Execution attempt failed"
            );
            self.inner.emit(EngineEvent::BetFailed {
                provider: provider.name().to_string(),
                attempt,
                error: last_error.clone(),
            });

            if attempt < max_retries {
                tokio::time::sleep(retry_delay * attempt).await;
                continue;
            }

            attempt = 0;
            if self.inner.failover(&mut tried).await.is_none() {
                break;
            }
        }

        self.inner.enter_error();
        error!(attempts = total_attempts, last_error = %last_error, "All providers exhausted");
        self.inner.emit(EngineEvent::Exhausted {
            attempts: total_attempts,
            last_error: last_error.clone(),
        });
        Err(EngineError::Exhausted {
            attempts: total_attempts,
            last_error,
        })
    }

    /// Close the session and disconnect. No-op when idle.
    pub async fn stop(&self) -> Option<Session> {
        let _ops = self.inner.ops.lock().await;

        let active = {
            let mut shared = self.inner.shared.lock();
            if shared.state == EngineState::Idle {
                return None;
            }
            shared.state = EngineState::Stopping;
            shared.active
        };
        *self.inner.health.lock() = None;

        if let Some(idx) = active {
            self.inner.providers[idx].disconnect().await;
        }

        let session = {
            let mut shared = self.inner.shared.lock();
            if let Some(started) = shared.started_at.take() {
                shared.metrics.uptime_ms = started.elapsed().as_millis() as u64;
            }
            if let Some(session) = shared.session.as_mut() {
                session.close(SessionStatus::Stopped);
            }
            shared.active = None;
            shared.paused = false;
            shared.credentials = None;
            shared.state = EngineState::Idle;
            shared.session.clone()
        };

        if let Some(s) = &session {
            info!(session = %s.id, actions = s.total_actions, profit = %s.profit, "Engine stopped");
        }
        self.inner.emit(EngineEvent::Stopped {
            session: session.clone(),
        });
        session
    }

    pub async fn pause(&self) -> EngineResult<()> {
        let _ops = self.inner.ops.lock().await;
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != EngineState::Running {
                return Err(EngineError::NotRunning);
            }
            if shared.paused {
                return Ok(());
            }
            shared.paused = true;
            if let Some(session) = shared.session.as_mut() {
                session.status = SessionStatus::Paused;
            }
        }
        info!("Engine paused");
        self.inner.emit(EngineEvent::Paused);
        Ok(())
    }

    pub async fn resume(&self) -> EngineResult<()> {
        let _ops = self.inner.ops.lock().await;
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != EngineState::Running {
                return Err(EngineError::NotRunning);
            }
            if !shared.paused {
                return Ok(());
            }
            shared.paused = false;
            if let Some(session) = shared.session.as_mut() {
                session.status = SessionStatus::Active;
            }
        }
        info!("Engine resumed");
        self.inner.emit(EngineEvent::Resumed);
        Ok(())
    }

    // -- Configuration -----------------------------------------------------

    pub fn options(&self) -> EngineOptions {
        self.inner.options.read().clone()
    }

    /// Applies to the next `start`/`execute`.
    pub fn update_options(&self, options: EngineOptions) {
        *self.inner.options.write() = options;
    }

    pub fn reset_metrics(&self) {
        self.inner.shared.lock().metrics = Metrics::default();
    }

    // -- Events ------------------------------------------------------------

    pub fn add_listener(&self, listener: EngineListener) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    // -- Snapshots ---------------------------------------------------------

    pub fn state(&self) -> EngineState {
        self.inner.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.inner.shared.lock().paused
    }

    /// Name of the connected provider, if any.
    pub fn active_provider(&self) -> Option<String> {
        self.inner.active_name()
    }

    /// Current session, or the last closed one.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.shared.lock().session.clone()
    }

    pub fn metrics(&self) -> Metrics {
        let shared = self.inner.shared.lock();
        let mut metrics = shared.metrics.clone();
        if let Some(started) = shared.started_at {
            metrics.uptime_ms = started.elapsed().as_millis() as u64;
        }
        metrics
    }

    /// Registered providers, ascending priority.
    pub fn providers(&self) -> &[Arc<dyn BettingProvider>] {
        &self.inner.providers
    }

    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.inner.providers.iter().map(|p| p.status()).collect()
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        *self.inner.health.lock() = None;
        let registrations = std::mem::take(&mut *self.inner.provider_listeners.lock());
        for (idx, id) in registrations {
            self.inner.providers[idx].remove_listener(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub::{StubOutcome, StubProvider};
    use crate::types::{Selection, SelectionType};
    use rust_decimal_macros::dec;

    fn creds() -> Credentials {
        Credentials::new("alice", "https://casino.example", "pw", "roulette-eu")
    }

    fn bet() -> ActionRequest {
        ActionRequest::new(
            "t1",
            vec![Selection::new(SelectionType::Color, "red", dec!(10))],
        )
    }

    fn fast() -> EngineOptions {
        EngineOptions {
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            preferred_provider: None,
        }
    }

    fn engine(stubs: &[Arc<StubProvider>], options: EngineOptions) -> ExecutionEngine {
        let providers = stubs
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn BettingProvider>)
            .collect();
        ExecutionEngine::new(providers, options)
    }

    #[tokio::test]
    async fn test_start_skips_failing_provider() {
        let a = Arc::new(StubProvider::new("a", 1).failing_connect("refused"));
        let b = Arc::new(StubProvider::new("b", 2));
        let engine = engine(&[b.clone(), a.clone()], fast());

        engine.start(creds()).await.unwrap();

        assert_eq!(engine.active_provider().as_deref(), Some("b"));
        assert_eq!(a.connect_calls(), 1);
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.current_session().is_some());
    }

    #[tokio::test]
    async fn test_start_prefers_hinted_provider() {
        let a = Arc::new(StubProvider::new("a", 1));
        let b = Arc::new(StubProvider::new("b", 2));
        let engine = engine(
            &[a.clone(), b.clone()],
            EngineOptions {
                preferred_provider: Some("b".into()),
                ..fast()
            },
        );

        engine.start(creds()).await.unwrap();
        assert_eq!(engine.active_provider().as_deref(), Some("b"));
        assert_eq!(a.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_all_fail_returns_to_idle() {
        let a = Arc::new(StubProvider::new("a", 1).failing_connect("refused"));
        let b = Arc::new(StubProvider::new("b", 2).unavailable());
        let engine = engine(&[a, b.clone()], fast());

        let err = engine.start(creds()).await.unwrap_err();
        assert!(matches!(err, EngineError::AllProvidersFailed(ref f) if f.len() == 2));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_session().is_none());
        assert_eq!(b.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a], fast());
        engine.start(creds()).await.unwrap();
        assert_eq!(
            engine.start(creds()).await.unwrap_err(),
            EngineError::AlreadyRunning
        );
    }

    #[tokio::test]
    async fn test_execute_requires_running() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a.clone()], fast());
        assert_eq!(engine.execute(&bet()).await.unwrap_err(), EngineError::NotRunning);
        assert_eq!(a.execute_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_io() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a.clone()], fast());
        engine.start(creds()).await.unwrap();

        let mut request = bet();
        request.total_amount = dec!(0);
        assert!(matches!(
            engine.execute(&request).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert_eq!(a.execute_calls(), 0);
        assert_eq!(engine.metrics().sessions_today, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_failover() {
        let a = Arc::new(StubProvider::new("a", 1).always(StubOutcome::Fail("jammed".into())));
        let b = Arc::new(StubProvider::new("b", 2));
        let engine = engine(&[a.clone(), b.clone()], fast());
        engine.start(creds()).await.unwrap();

        let result = engine.execute(&bet()).await.unwrap();

        assert!(result.success);
        assert_eq!(a.execute_calls(), 3);
        assert_eq!(b.execute_calls(), 1);
        assert_eq!(engine.active_provider().as_deref(), Some("b"));
        assert!(!a.is_connected());

        let session = engine.current_session().unwrap();
        assert_eq!(session.total_actions, 4);
        assert_eq!(session.total_wagered, dec!(40));
        assert_eq!(session.winning_actions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_enters_error() {
        let a = Arc::new(StubProvider::new("a", 1).always(StubOutcome::Fail("down".into())));
        let b = Arc::new(StubProvider::new("b", 2).always(StubOutcome::Fail("down".into())));
        let engine = engine(&[a, b], fast());
        engine.start(creds()).await.unwrap();

        let err = engine.execute(&bet()).await.unwrap_err();
        assert!(matches!(err, EngineError::Exhausted { attempts: 6, .. }));
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.active_provider().is_none());

        let session = engine.current_session().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.total_actions, 6);
        assert_eq!(session.profit, dec!(0));
        assert_eq!(session.total_won, dec!(0));

        // Error state can be stopped and restarted.
        assert!(engine.stop().await.is_some());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a.clone()], fast());
        assert!(engine.stop().await.is_none());

        engine.start(creds()).await.unwrap();
        let session = engine.stop().await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(session.ended_at.is_some());
        assert!(engine.stop().await.is_none());
        assert_eq!(a.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_triggers_self_heal() {
        let a = Arc::new(StubProvider::new("a", 1));
        let b = Arc::new(StubProvider::new("b", 2));
        let engine = engine(&[a.clone(), b.clone()], fast());
        engine.start(creds()).await.unwrap();

        a.drop_connection("socket closed");

        for _ in 0..50 {
            if engine.active_provider().as_deref() == Some("b") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.active_provider().as_deref(), Some("b"));
        assert!(engine.is_running());
    }

    #[tokio::test]
    async fn test_pause_blocks_execute() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a], fast());
        engine.start(creds()).await.unwrap();

        engine.pause().await.unwrap();
        assert_eq!(engine.execute(&bet()).await.unwrap_err(), EngineError::Paused);
        assert_eq!(engine.current_session().unwrap().status, SessionStatus::Paused);

        engine.resume().await.unwrap();
        assert!(engine.execute(&bet()).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_events_forwarded() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a], fast());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        engine.add_listener(Arc::new(move |e: &EngineEvent| {
            let tag = match e {
                EngineEvent::Started { .. } => "started",
                EngineEvent::BetCompleted { .. } => "completed",
                EngineEvent::Stopped { .. } => "stopped",
                EngineEvent::Provider(_) => return,
                _ => "other",
            };
            s.lock().push(tag);
        }));

        engine.start(creds()).await.unwrap();
        engine.execute(&bet()).await.unwrap();
        engine.stop().await;

        assert_eq!(*seen.lock(), vec!["started", "completed", "stopped"]);
    }

    #[test]
    fn test_drop_unregisters_provider_listeners() {
        let a = Arc::new(StubProvider::new("a", 1));
        let engine = engine(&[a.clone()], fast());
        assert_eq!(a.listener_count(), 1);
        drop(engine);
        assert_eq!(a.listener_count(), 0);
    }
}
