//! Automation manager: lifecycle facade around one execution engine.
//!
//! Wraps every wager in risk governance: limits are checked before the
//! engine sees the request, and the updated metrics are assessed after
//! it settles. Engine and provider events are translated onto a single
//! public notification bus.

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AutomationConfig;
use crate::engine::{EngineState, ExecutionEngine};
use crate::error::{AutomationError, AutomationResult, EngineError};
use crate::events::{AutomationEvent, EngineEvent, NotificationBus, NotificationReceiver};
use crate::providers::BettingProvider;
use crate::risk::RiskGovernor;
use crate::types::{ActionRequest, ActionResult, Credentials, Metrics, ProviderStatus, Session};

/// Builds a fresh set of providers. Called once for the manager's own
/// engine and again for every `test_connection`.
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> Vec<Arc<dyn BettingProvider>>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Vec<Arc<dyn BettingProvider>> + Send + Sync,
{
    fn create(&self) -> Vec<Arc<dyn BettingProvider>> {
        self()
    }
}

/// One entry of the ranked provider list.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOption {
    pub name: String,
    pub priority: u32,
    pub available: bool,
    pub connected: bool,
    pub success_rate: f64,
    pub response_time_ms: f64,
    /// First available provider in start order.
    pub recommended: bool,
}

/// Aggregate snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedStatus {
    pub enabled: bool,
    pub state: EngineState,
    pub paused: bool,
    pub active_provider: Option<String>,
    pub session: Option<Session>,
    pub metrics: Metrics,
    pub providers: Vec<ProviderStatus>,
    pub config: AutomationConfig,
}

pub struct AutomationManager {
    config: Arc<RwLock<AutomationConfig>>,
    factory: Arc<dyn ProviderFactory>,
    engine: ExecutionEngine,
    bus: NotificationBus,
    last_action: Mutex<Option<Instant>>,
}

impl AutomationManager {
    pub fn new(config: AutomationConfig, factory: Arc<dyn ProviderFactory>) -> AutomationResult<Self> {
        config.validate().map_err(AutomationError::InvalidConfig)?;

        let engine = ExecutionEngine::new(factory.create(), config.engine_options());
        let config = Arc::new(RwLock::new(config));
        let bus = NotificationBus::default();

        let listener_config = Arc::clone(&config);
        let listener_bus = bus.clone();
        engine.add_listener(Arc::new(move |event: &EngineEvent| {
            if !listener_config.read().notifications {
                return;
            }
            if let Some(translated) = AutomationEvent::from_engine(event) {
                listener_bus.publish(translated);
            }
        }));

        Ok(Self {
            config,
            factory,
            engine,
            bus,
            last_action: Mutex::new(None),
        })
    }

    fn notify(&self, event: AutomationEvent) {
        if self.config.read().notifications {
            self.bus.publish(event);
        }
    }

    // -- Lifecycle ---------------------------------------------------------

    pub async fn start(&self, credentials: Credentials) -> AutomationResult<()> {
        if !self.config.read().enabled {
            return Err(AutomationError::Disabled);
        }
        self.engine.start(credentials).await?;
        *self.last_action.lock() = None;
        Ok(())
    }

    pub async fn stop(&self) -> Option<Session> {
        self.engine.stop().await
    }

    pub async fn pause(&self) -> AutomationResult<()> {
        Ok(self.engine.pause().await?)
    }

    pub async fn resume(&self) -> AutomationResult<()> {
        Ok(self.engine.resume().await?)
    }

    // -- Wagers ------------------------------------------------------------

    /// Place one wager under risk governance.
    pub async fn place_bet(&self, request: ActionRequest) -> AutomationResult<ActionResult> {
        let config = self.config();
        if !config.enabled {
            return Err(AutomationError::Disabled);
        }
        request
            .validate()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        let governor = RiskGovernor::new(config.risk_limits());
        if let Err(violation) = governor.validate(&request, &self.engine.metrics()) {
            warn!(table = %request.table_id, amount = %request.total_amount, reason = %violation, "Wager rejected by risk limits");
            self.notify(AutomationEvent::BetRejected {
                reason: violation.to_string(),
            });
            return Err(violation.into());
        }

        self.wait_cooldown(&config).await;
        let outcome = self.engine.execute(&request).await;
        *self.last_action.lock() = Some(Instant::now());
        let result = outcome?;

        let terminated = self.check_post_execution_limits(&governor).await;
        if !terminated && request.stop_on_win && result.is_win() && self.engine.is_running() {
            info!(table = %request.table_id, profit = %result.net_profit(), "Stop-on-win reached, ending session");
            let profit = self.engine.metrics().total_profit;
            self.engine.stop().await;
            self.notify(AutomationEvent::SessionTerminated {
                reason: "stop on win".to_string(),
                profit,
            });
        }

        Ok(result)
    }

    async fn wait_cooldown(&self, config: &AutomationConfig) {
        let cooldown = config.cooldown();
        if cooldown.is_zero() {
            return;
        }
        let last = *self.last_action.lock();
        if let Some(last) = last {
            let ready_at = last + cooldown;
            if ready_at > Instant::now() {
                debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "Cooling down");
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }

    /// Assess the metrics after a settled wager. Returns `true` when the
    /// session was terminated.
    async fn check_post_execution_limits(&self, governor: &RiskGovernor) -> bool {
        let metrics = self.engine.metrics();
        let mut terminated = false;

        for alert in governor.assess(&metrics) {
            if alert.is_terminal() {
                warn!(profit = %metrics.total_profit, "{}", alert.message());
                if self.engine.is_running() {
                    self.engine.stop().await;
                }
                self.notify(AutomationEvent::SessionTerminated {
                    reason: alert.message(),
                    profit: metrics.total_profit,
                });
                terminated = true;
            } else {
                info!(kind = alert.kind(), percentage = alert.percentage(), "{}", alert.message());
                self.notify(AutomationEvent::RiskWarning {
                    kind: alert.kind().to_string(),
                    percentage: alert.percentage(),
                    message: alert.message(),
                });
            }
        }

        terminated
    }

    // -- Configuration -----------------------------------------------------

    pub fn config(&self) -> AutomationConfig {
        self.config.read().clone()
    }

    /// Replace the configuration as a whole. Retry options reach the
    /// engine immediately; limits apply from the next wager.
    pub fn update_config(&self, config: AutomationConfig) -> AutomationResult<()> {
        config.validate().map_err(AutomationError::InvalidConfig)?;
        let options = config.engine_options();
        *self.config.write() = config;
        self.engine.update_options(options);
        info!("Automation config updated");
        self.notify(AutomationEvent::ConfigUpdated);
        Ok(())
    }

    pub fn reset_metrics(&self) {
        self.engine.reset_metrics();
    }

    // -- Projections -------------------------------------------------------

    /// Running and not paused.
    pub fn is_active(&self) -> bool {
        self.engine.is_running() && !self.engine.is_paused()
    }

    pub fn current_provider(&self) -> Option<String> {
        self.engine.active_provider()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.engine.current_session()
    }

    pub fn metrics(&self) -> Metrics {
        self.engine.metrics()
    }

    pub fn detailed_status(&self) -> DetailedStatus {
        DetailedStatus {
            enabled: self.config.read().enabled,
            state: self.engine.state(),
            paused: self.engine.is_paused(),
            active_provider: self.engine.active_provider(),
            session: self.engine.current_session(),
            metrics: self.engine.metrics(),
            providers: self.engine.provider_statuses(),
            config: self.config(),
        }
    }

    /// Providers in start order, the preferred one first.
    pub fn provider_options(&self) -> Vec<ProviderOption> {
        let preferred = self.config.read().preferred_provider.clone();
        let mut options: Vec<ProviderOption> = self
            .engine
            .providers()
            .iter()
            .map(|p| {
                let status = p.status();
                ProviderOption {
                    name: status.name,
                    priority: status.priority,
                    available: status.available,
                    connected: status.connected,
                    success_rate: status.success_rate,
                    response_time_ms: status.response_time_ms,
                    recommended: false,
                }
            })
            .collect();

        if let Some(name) = preferred {
            if let Some(pos) = options.iter().position(|o| o.name == name) {
                let option = options.remove(pos);
                options.insert(0, option);
            }
        }
        if let Some(first) = options.iter_mut().find(|o| o.available) {
            first.recommended = true;
        }
        options
    }

    /// Connect and disconnect a throwaway engine built from fresh
    /// providers. Returns the name of the provider that connected.
    pub async fn test_connection(&self, credentials: Credentials) -> AutomationResult<String> {
        let engine = ExecutionEngine::new(self.factory.create(), self.config().engine_options());
        engine.start(credentials).await?;
        let provider = engine.active_provider().unwrap_or_default();
        engine.stop().await;
        info!(provider = %provider, "Connection test succeeded");
        Ok(provider)
    }

    // -- Notifications -----------------------------------------------------

    pub fn subscribe(&self) -> NotificationReceiver {
        self.bus.subscribe()
    }

    pub fn session_profit(&self) -> Decimal {
        self.engine
            .current_session()
            .map(|s| s.profit)
            .unwrap_or(Decimal::ZERO)
    }
}
