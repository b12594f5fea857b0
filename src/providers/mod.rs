//! Backend adapters.
//!
//! Defines the `BettingProvider` trait and provides implementations for:
//! - Sandbox: in-process isolated context reached only through
//!   correlated, serialized messages
//! - Driver: out-of-process browser automation over W3C WebDriver
//! - Stub: scripted in-memory backend for tests and dry runs
//!
//! `ProviderCore` carries the behaviour every adapter shares: request
//! validation, timing, counters and the listener registry.

pub mod driver;
pub mod sandbox;
pub mod stub;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::ProvidersConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::events::{ListenerId, Listeners, ProviderEvent, ProviderListener};
use crate::types::{ActionRequest, ActionResult, BetOutcome, Credentials, ProviderStatus};

use driver::DriverProvider;
use sandbox::SandboxProvider;

/// Abstraction over wager execution backends.
///
/// Implementors must be safe to call through a shared reference; state
/// that changes across calls lives behind interior mutability.
#[async_trait]
pub trait BettingProvider: Send + Sync {
    /// Provider name for logging and identification.
    fn name(&self) -> &str;

    /// Lower is tried first.
    fn priority(&self) -> u32;

    /// Side-effect-free capability check. Never fails.
    fn is_available(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Establish a session with the backend.
    async fn connect(&self, credentials: &Credentials) -> ProviderResult<()>;

    /// Tear the session down. Safe to call repeatedly or when never connected.
    async fn disconnect(&self);

    /// Place one wager.
    ///
    /// Backend faults come back as a failed `ActionResult`. Only
    /// precondition violations (not connected, invalid request) are
    /// returned as `Err`.
    async fn execute(&self, request: &ActionRequest) -> ProviderResult<ActionResult>;

    fn status(&self) -> ProviderStatus;

    fn add_listener(&self, listener: ProviderListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;
}

// ---------------------------------------------------------------------------
// Shared adapter core
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    total_response_ms: u64,
    last_error: Option<String>,
}

/// State and behaviour shared by every adapter.
pub struct ProviderCore {
    name: String,
    priority: u32,
    connected: AtomicBool,
    counters: Mutex<Counters>,
    listeners: Listeners<ProviderEvent>,
}

impl ProviderCore {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            connected: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Flip the connected flag, returning the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: ProviderListener) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&self, event: ProviderEvent) {
        self.listeners.emit(&event);
    }

    /// Mark connected and announce the session.
    pub fn session_started(&self) {
        self.set_connected(true);
        self.emit(ProviderEvent::SessionStart {
            provider: self.name.clone(),
        });
    }

    /// Mark disconnected and announce the end of the session with the
    /// final status.
    pub fn session_ended(&self, available: bool) {
        self.set_connected(false);
        self.emit(ProviderEvent::SessionEnd {
            provider: self.name.clone(),
            status: self.status(available),
        });
    }

    /// Record a failure reason and emit an `Error` event.
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.counters.lock().last_error = Some(message.clone());
        self.emit(ProviderEvent::Error {
            provider: self.name.clone(),
            message,
        });
    }

    /// The substrate went away. Emits `Disconnected` only on the
    /// connected → disconnected edge.
    pub fn connection_lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.set_connected(false) {
            warn!(provider = %self.name, reason = %reason, "Provider connection lost");
            self.counters.lock().last_error = Some(reason.clone());
            self.emit(ProviderEvent::Disconnected {
                provider: self.name.clone(),
                reason,
            });
        }
    }

    pub fn status(&self, available: bool) -> ProviderStatus {
        let counters = self.counters.lock();
        let (success_rate, response_time_ms) = if counters.total == 0 {
            (0.0, 0.0)
        } else {
            (
                counters.successful as f64 / counters.total as f64 * 100.0,
                counters.total_response_ms as f64 / counters.total as f64,
            )
        };
        ProviderStatus {
            name: self.name.clone(),
            priority: self.priority,
            available,
            connected: self.is_connected(),
            last_error: counters.last_error.clone(),
            response_time_ms,
            success_rate,
            total_actions: counters.total,
        }
    }

    /// Run one wager through the shared execution pipeline.
    ///
    /// Validates the request and the connection before calling `place`,
    /// times the call, updates counters and folds non-fatal errors into
    /// a failed result.
    pub async fn run_execute<F, Fut>(
        &self,
        request: &ActionRequest,
        place: F,
    ) -> ProviderResult<ActionResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<BetOutcome>>,
    {
        request.validate()?;
        if !self.is_connected() {
            return Err(ProviderError::NotConnected(self.name.clone()));
        }

        self.emit(ProviderEvent::BetPlaced {
            provider: self.name.clone(),
            request: request.clone(),
        });

        let started = Instant::now();
        let outcome = place().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        {
            let mut counters = self.counters.lock();
            counters.total += 1;
            counters.total_response_ms += duration_ms;
            match &outcome {
                Ok(_) => counters.successful += 1,
                Err(e) => counters.last_error = Some(e.to_string()),
            }
        }

        let result = match outcome {
            Ok(outcome) => {
                debug!(
                    provider = %self.name,
                    table = %request.table_id,
                    profit = %outcome.profit,
                    duration_ms,
                    "Wager settled"
                );
                ActionResult::settled(outcome, duration_ms)
            }
            Err(e) => {
                warn!(provider = %self.name, error = %e, duration_ms, "Wager failed");
                self.emit(ProviderEvent::Error {
                    provider: self.name.clone(),
                    message: e.to_string(),
                });
                if e.is_fatal() {
                    return Err(e);
                }
                ActionResult::failed(e.to_string(), duration_ms)
            }
        };

        self.emit(ProviderEvent::BetResult {
            provider: self.name.clone(),
            result: result.clone(),
        });
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Build every enabled provider from configuration, sorted by priority.
pub fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn BettingProvider>> {
    let mut providers: Vec<Arc<dyn BettingProvider>> = Vec::new();

    if config.sandbox.enabled {
        providers.push(Arc::new(SandboxProvider::from_config(&config.sandbox)));
    }
    if config.driver.enabled {
        match DriverProvider::from_config(&config.driver) {
            Ok(driver) => providers.push(Arc::new(driver)),
            Err(e) => warn!(error = %e, "Skipping browser driver provider"),
        }
    }

    sort_by_priority(&mut providers);
    providers
}

/// Stable sort by ascending priority.
pub fn sort_by_priority(providers: &mut [Arc<dyn BettingProvider>]) {
    providers.sort_by_key(|p| p.priority());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
