//! Shared fixtures.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use croupier::config::AutomationConfig;
use croupier::engine::{EngineOptions, ExecutionEngine};
use croupier::events::{EngineEvent, NotificationReceiver};
use croupier::manager::{AutomationManager, ProviderFactory};
use croupier::providers::stub::StubProvider;
use croupier::providers::BettingProvider;
use croupier::types::{ActionRequest, Credentials, Selection, SelectionType};

pub fn creds() -> Credentials {
    Credentials::new("alice", "https://casino.example/lobby", "hunter2", "roulette-eu")
}

/// Even-money wager on red.
pub fn red(amount: Decimal) -> ActionRequest {
    ActionRequest::new(
        "table-1",
        vec![Selection::new(SelectionType::Color, "red", amount)],
    )
}

pub fn fast_options() -> EngineOptions {
    EngineOptions {
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        preferred_provider: None,
    }
}

pub fn as_providers(stubs: &[Arc<StubProvider>]) -> Vec<Arc<dyn BettingProvider>> {
    stubs
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn BettingProvider>)
        .collect()
}

pub fn engine(stubs: &[Arc<StubProvider>]) -> ExecutionEngine {
    ExecutionEngine::new(as_providers(stubs), fast_options())
}

/// Factory that hands out the same provider instances every time.
pub fn fixed_factory(providers: Vec<Arc<dyn BettingProvider>>) -> Arc<dyn ProviderFactory> {
    Arc::new(move || providers.clone())
}

pub fn manager(providers: Vec<Arc<dyn BettingProvider>>, config: AutomationConfig) -> AutomationManager {
    AutomationManager::new(config, fixed_factory(providers)).expect("valid config")
}

/// Record the engine's own events (provider events excluded) by tag.
pub fn record_engine_events(engine: &ExecutionEngine) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.add_listener(Arc::new(move |event: &EngineEvent| {
        let tag = match event {
            EngineEvent::Started { .. } => "started",
            EngineEvent::Stopped { .. } => "stopped",
            EngineEvent::Paused => "paused",
            EngineEvent::Resumed => "resumed",
            EngineEvent::ProviderSwitched { .. } => "switched",
            EngineEvent::BetCompleted { .. } => "completed",
            EngineEvent::BetFailed { .. } => "failed",
            EngineEvent::Exhausted { .. } => "exhausted",
            EngineEvent::Provider(_) => return,
        };
        sink.lock().push(tag);
    }));
    seen
}

pub fn notification_names(rx: &mut NotificationReceiver) -> Vec<&'static str> {
    rx.drain().iter().map(|n| n.name()).collect()
}
