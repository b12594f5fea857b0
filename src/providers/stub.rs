//! Stub provider, a test fixture.
//!
//! Settles wagers from a script of outcomes without touching any
//! backend. Connection faults, unavailability and mid-session drops can
//! be simulated. Public so the integration tests can drive the engine
//! and manager with it; `build_providers` never creates one.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::events::{ListenerId, ProviderListener};
use crate::types::{ActionRequest, ActionResult, BetOutcome, Credentials, ProviderStatus};

use super::{BettingProvider, ProviderCore};

/// What the stub does with the next wager.
#[derive(Debug, Clone, PartialEq)]
pub enum StubOutcome {
    /// Even-money win: payout 2× stake.
    Win,
    /// Stake lost.
    Lose,
    /// Settle with an explicit profit; payout is stake + profit (never negative).
    Profit(Decimal),
    /// Backend fault.
    Fail(String),
}

pub struct StubProvider {
    core: ProviderCore,
    available: AtomicBool,
    connect_failure: Mutex<Option<String>>,
    script: Mutex<VecDeque<StubOutcome>>,
    fallback: Mutex<StubOutcome>,
    delay: Mutex<Option<Duration>>,
    bet_counter: AtomicU64,
    connect_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl StubProvider {
    /// Available stub that wins every wager.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            core: ProviderCore::new(name, priority),
            available: AtomicBool::new(true),
            connect_failure: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(StubOutcome::Win),
            delay: Mutex::new(None),
            bet_counter: AtomicU64::new(0),
            connect_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes consumed in order before the fallback applies.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = StubOutcome>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Outcome used once the script is empty.
    pub fn always(self, outcome: StubOutcome) -> Self {
        *self.fallback.lock() = outcome;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_connect(self, reason: impl Into<String>) -> Self {
        *self.connect_failure.lock() = Some(reason.into());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn push_outcome(&self, outcome: StubOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_connect_failure(&self, reason: Option<String>) {
        *self.connect_failure.lock() = reason;
    }

    /// Simulate the backend going away mid-session.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.core.connection_lost(reason);
    }

    /// Emit a backend error outside of any wager.
    pub fn raise_error(&self, message: impl Into<String>) {
        self.core.report_error(message);
    }

    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Wagers that reached the simulated backend.
    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> StubOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }

    async fn settle(&self, request: &ActionRequest) -> ProviderResult<BetOutcome> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let stake = request.total_amount;
        let profit = match self.next_outcome() {
            StubOutcome::Win => stake,
            StubOutcome::Lose => -stake,
            StubOutcome::Profit(p) => p,
            StubOutcome::Fail(reason) => return Err(ProviderError::Execution(reason)),
        };

        let id = self.bet_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BetOutcome {
            bet_id: Some(format!("STUB-{id}")),
            winning_value: None,
            winning_category: None,
            payout: (stake + profit).max(Decimal::ZERO),
            profit,
        })
    }
}

#[async_trait]
impl BettingProvider for StubProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn priority(&self) -> u32 {
        self.core.priority()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn connect(&self, _credentials: &Credentials) -> ProviderResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_available() {
            return Err(ProviderError::Unavailable(self.name().to_string()));
        }
        let failure = self.connect_failure.lock().clone();
        if let Some(reason) = failure {
            self.core.report_error(reason.clone());
            return Err(ProviderError::Connection(reason));
        }

        self.core.session_started();
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.core.is_connected() {
            self.core.session_ended(self.is_available());
        }
    }

    async fn execute(&self, request: &ActionRequest) -> ProviderResult<ActionResult> {
        self.core.run_execute(request, || self.settle(request)).await
    }

    fn status(&self) -> ProviderStatus {
        self.core.status(self.is_available())
    }

    fn add_listener(&self, listener: ProviderListener) -> ListenerId {
        self.core.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }
}
