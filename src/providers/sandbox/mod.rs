//! Sandboxed-context provider.
//!
//! Runs the table program in an isolated context and talks to it only
//! through serialized frames. Commands carry a fresh request id and are
//! matched to their response through the pending-request table. Frames
//! from any origin other than the live context are dropped.
//!
//! Connection sequence:
//! 1. spawn the context with the bootstrap program
//! 2. wait for `READY` (connect timeout)
//! 3. `LOGIN` → `LOGIN_RESULT` (login timeout)

pub mod context;
pub mod correlation;
pub mod protocol;
pub mod table;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SandboxConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::events::{ListenerId, ProviderListener};
use crate::types::{ActionRequest, ActionResult, BetOutcome, Credentials, ProviderStatus};

use super::{BettingProvider, ProviderCore};
use context::{ContextId, Envelope, IsolatedContext, SandboxProgram};
use correlation::PendingRequests;
use protocol::{BetPayload, LoginPayload, SandboxMessage};
use table::{RouletteTable, TableProgram};

/// Builds the bootstrap program for a new context.
pub type ProgramFactory = Arc<dyn Fn(&Credentials) -> Box<dyn SandboxProgram> + Send + Sync>;

/// Timeouts and buffer sizes for the sandbox boundary.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub connect_timeout: Duration,
    pub login_timeout: Duration,
    pub bet_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(30),
            bet_timeout: Duration::from_secs(60),
            channel_capacity: 64,
        }
    }
}

struct Connection {
    context: IsolatedContext,
    dispatcher: JoinHandle<()>,
}

pub struct SandboxProvider {
    core: Arc<ProviderCore>,
    settings: SandboxSettings,
    factory: ProgramFactory,
    pending: PendingRequests,
    connection: Mutex<Option<Connection>>,
    window: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl SandboxProvider {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        settings: SandboxSettings,
        factory: ProgramFactory,
    ) -> Self {
        Self {
            core: Arc::new(ProviderCore::new(name, priority)),
            settings,
            factory,
            pending: PendingRequests::new(),
            connection: Mutex::new(None),
            window: Mutex::new(None),
        }
    }

    /// Provider backed by the simulated roulette table.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let balance = Decimal::try_from(config.starting_balance).unwrap_or(Decimal::ZERO);
        let seed = config.seed;
        let factory: ProgramFactory = Arc::new(move |_credentials: &Credentials| {
            let table = match seed {
                Some(seed) => RouletteTable::seeded(balance, seed),
                None => RouletteTable::new(balance),
            };
            Box::new(TableProgram::new(table)) as Box<dyn SandboxProgram>
        });

        let settings = SandboxSettings {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            login_timeout: Duration::from_millis(config.login_timeout_ms),
            bet_timeout: Duration::from_millis(config.bet_timeout_ms),
            channel_capacity: config.channel_capacity,
        };
        Self::new("sandbox", config.priority, settings, factory)
    }

    /// Sender into the host window, the channel every context posts to.
    /// `None` while no context is running.
    pub fn window(&self) -> Option<mpsc::Sender<Envelope>> {
        self.window.lock().clone()
    }

    /// Origin of the live context.
    pub fn context_id(&self) -> Option<ContextId> {
        self.connection.lock().as_ref().map(|c| c.context.id())
    }

    /// Number of commands still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn spawn_context(&self, credentials: &Credentials) -> oneshot::Receiver<()> {
        let capacity = self.settings.channel_capacity.max(1);
        let (window_tx, window_rx) = mpsc::channel(capacity);
        let (context, exited) =
            IsolatedContext::spawn((self.factory)(credentials), window_tx.clone(), capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        let dispatcher = tokio::spawn(dispatch(
            context.id(),
            window_rx,
            exited,
            ready_tx,
            self.pending.clone(),
            Arc::clone(&self.core),
        ));

        debug!(provider = %self.core.name(), context = %context.id(), "Sandbox context spawned");
        *self.connection.lock() = Some(Connection {
            context,
            dispatcher,
        });
        *self.window.lock() = Some(window_tx);
        ready_rx
    }

    /// Destroy the context and its dispatcher. Returns whether one existed.
    fn teardown(&self) -> bool {
        let connection = self.connection.lock().take();
        *self.window.lock() = None;
        let cancelled = self.pending.clear();
        if cancelled > 0 {
            debug!(provider = %self.core.name(), cancelled, "Cancelled pending requests");
        }
        match connection {
            Some(conn) => {
                conn.dispatcher.abort();
                conn.context.destroy();
                true
            }
            None => false,
        }
    }

    /// Send a correlated command and wait for its response. Enqueueing and
    /// waiting are each bounded by `timeout`.
    async fn call(
        &self,
        build: impl FnOnce(String) -> SandboxMessage,
        timeout: Duration,
        operation: &str,
    ) -> ProviderResult<SandboxMessage> {
        let inbox = self
            .connection
            .lock()
            .as_ref()
            .map(|c| c.context.sender())
            .ok_or_else(|| ProviderError::NotConnected(self.core.name().to_string()))?;

        let waiter = self.pending.register();
        let frame = build(waiter.id().to_string())
            .encode()
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        match tokio::time::timeout(timeout, inbox.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ProviderError::Connection(
                    "sandbox context is gone".to_string(),
                ))
            }
            Err(_) => {
                warn!(provider = %self.core.name(), operation, "Sandbox inbox full, request not delivered");
                return Err(ProviderError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        waiter.wait(timeout, operation).await
    }

    async fn handshake(&self, credentials: &Credentials) -> ProviderResult<()> {
        let ready = self.spawn_context(credentials);
        match tokio::time::timeout(self.settings.connect_timeout, ready).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ProviderError::Connection(
                    "sandbox context exited before READY".to_string(),
                ))
            }
            Err(_) => {
                return Err(ProviderError::Timeout {
                    operation: "READY".to_string(),
                    timeout_ms: self.settings.connect_timeout.as_millis() as u64,
                })
            }
        }

        let payload = LoginPayload {
            username: credentials.username.clone(),
            password: credentials.secret().to_string(),
            site: credentials.site.clone(),
        };
        let reply = self
            .call(
                |request_id| SandboxMessage::Login {
                    request_id,
                    data: payload,
                },
                self.settings.login_timeout,
                "LOGIN",
            )
            .await?;

        match reply {
            SandboxMessage::LoginResult {
                error: Some(reason),
                ..
            }
            | SandboxMessage::Error { error: reason, .. } => {
                Err(ProviderError::LoginRejected(reason))
            }
            SandboxMessage::LoginResult { data, .. } => {
                if let Some(ack) = data {
                    info!(provider = %self.core.name(), balance = %ack.balance, "Sandbox login accepted");
                }
                Ok(())
            }
            other => Err(ProviderError::Protocol(format!(
                "unexpected {} reply to LOGIN",
                other.kind()
            ))),
        }
    }

    async fn place_bet(&self, request: &ActionRequest) -> ProviderResult<BetOutcome> {
        let payload = BetPayload {
            table_id: request.table_id.clone(),
            selections: request.selections.clone(),
            total_amount: request.total_amount,
        };
        let reply = self
            .call(
                |request_id| SandboxMessage::PlaceBet {
                    request_id,
                    data: payload,
                },
                self.settings.bet_timeout,
                "PLACE_BET",
            )
            .await?;

        match reply {
            SandboxMessage::BetResult {
                error: Some(reason),
                ..
            }
            | SandboxMessage::Error { error: reason, .. } => Err(ProviderError::Execution(reason)),
            SandboxMessage::BetResult {
                data: Some(settlement),
                ..
            } => Ok(settlement.into()),
            other => Err(ProviderError::Protocol(format!(
                "unexpected {} reply to PLACE_BET",
                other.kind()
            ))),
        }
    }
}

/// Route frames from the window to their waiters until the context dies
/// or the dispatcher is aborted.
async fn dispatch(
    origin: ContextId,
    mut window: mpsc::Receiver<Envelope>,
    mut exited: oneshot::Receiver<()>,
    ready: oneshot::Sender<()>,
    pending: PendingRequests,
    core: Arc<ProviderCore>,
) {
    let mut ready = Some(ready);

    loop {
        tokio::select! {
            biased;

            envelope = window.recv() => {
                let Some(envelope) = envelope else { break };
                if envelope.origin != origin {
                    warn!(
                        provider = %core.name(),
                        origin = %envelope.origin,
                        "Dropping frame from unknown origin"
                    );
                    continue;
                }

                let message = match SandboxMessage::decode(&envelope.body) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(provider = %core.name(), error = %e, "Dropping malformed frame");
                        continue;
                    }
                };

                match message {
                    SandboxMessage::Ready => {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(());
                        }
                    }
                    SandboxMessage::Log { data } => match data.level.as_str() {
                        "error" => error!(provider = %core.name(), "[context] {}", data.message),
                        "warn" => warn!(provider = %core.name(), "[context] {}", data.message),
                        "debug" => debug!(provider = %core.name(), "[context] {}", data.message),
                        _ => info!(provider = %core.name(), "[context] {}", data.message),
                    },
                    SandboxMessage::Error { request_id: None, error } => {
                        core.report_error(format!("context error: {error}"));
                    }
                    other => {
                        let kind = other.kind();
                        match other.request_id().map(str::to_string) {
                            Some(id) => {
                                if !pending.resolve(&id, Ok(other)) {
                                    debug!(provider = %core.name(), kind, request_id = %id, "No waiter for response");
                                }
                            }
                            None => debug!(provider = %core.name(), kind, "Ignoring uncorrelated frame"),
                        }
                    }
                }
            }

            _ = &mut exited => {
                let rejected = pending.fail_all(ProviderError::Connection(
                    "sandbox context terminated".to_string(),
                ));
                debug!(provider = %core.name(), rejected, "Sandbox context exited");
                core.connection_lost("sandbox context terminated");
                break;
            }
        }
    }
}

#[async_trait]
impl BettingProvider for SandboxProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn priority(&self) -> u32 {
        self.core.priority()
    }

    /// Contexts are tasks, so a runtime is all that is needed.
    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn connect(&self, credentials: &Credentials) -> ProviderResult<()> {
        if self.core.is_connected() {
            return Ok(());
        }
        self.teardown();

        info!(provider = %self.core.name(), user = %credentials.username, "Connecting sandbox");
        match self.handshake(credentials).await {
            Ok(()) => {
                self.core.session_started();
                Ok(())
            }
            Err(e) => {
                warn!(provider = %self.core.name(), error = %e, "Sandbox connect failed");
                self.teardown();
                self.core.report_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let was_connected = self.core.set_connected(false);
        let had_context = self.teardown();
        if was_connected || had_context {
            info!(provider = %self.core.name(), "Sandbox disconnected");
            self.core.session_ended(self.is_available());
        }
    }

    async fn execute(&self, request: &ActionRequest) -> ProviderResult<ActionResult> {
        self.core.run_execute(request, || self.place_bet(request)).await
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

impl Drop for SandboxProvider {
    fn drop(&mut self) {
        self.teardown();
    }
}
