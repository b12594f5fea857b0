//! Out-of-process browser driver provider.
//!
//! Drives a browser through any W3C WebDriver endpoint (chromedriver,
//! geckodriver, Selenium Grid). The site itself is operated by two async
//! scripts supplied by configuration; each receives a JSON argument and
//! must call the WebDriver completion callback with
//! `{ ok: bool, data?: any, error?: string }`.
//!
//! Commands:
//! - `POST   /session`                     create the browser session
//! - `POST   /session/{id}/timeouts`       set the script timeout
//! - `POST   /session/{id}/url`            open the credentials endpoint
//! - `POST   /session/{id}/execute/async`  run the login or bet script
//! - `DELETE /session/{id}`                tear down

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::events::{ListenerId, ProviderListener};
use crate::types::{ActionRequest, ActionResult, BetOutcome, Credentials, ProviderStatus};

use super::sandbox::protocol::{BetPayload, BetSettlement};
use super::{BettingProvider, ProviderCore};

/// Default login hook: delegates to `window.__croupier.login(credentials)`.
pub const DEFAULT_LOGIN_SCRIPT: &str = r#"
const args = Array.from(arguments);
const done = args.pop();
const hooks = window.__croupier;
if (!hooks || typeof hooks.login !== 'function') {
  done({ ok: false, error: 'site hooks not installed' });
  return;
}
Promise.resolve(hooks.login(args[0])).then(
  (data) => done({ ok: true, data: data }),
  (err) => done({ ok: false, error: String(err) })
);
"#;

/// Default bet hook: delegates to `window.__croupier.placeBet(bet)` which
/// must resolve to `{betId, winningNumber, winningColor, payout, profit}`.
pub const DEFAULT_BET_SCRIPT: &str = r#"
const args = Array.from(arguments);
const done = args.pop();
const hooks = window.__croupier;
if (!hooks || typeof hooks.placeBet !== 'function') {
  done({ ok: false, error: 'site hooks not installed' });
  return;
}
Promise.resolve(hooks.placeBet(args[0])).then(
  (data) => done({ ok: true, data: data }),
  (err) => done({ ok: false, error: String(err) })
);
"#;

// ---------------------------------------------------------------------------
// WebDriver wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WdResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WdError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    ok: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub webdriver_url: String,
    pub browser: String,
    pub headless: bool,
    pub command_timeout: Duration,
    pub script_timeout: Duration,
    pub login_script: String,
    pub bet_script: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            command_timeout: Duration::from_secs(30),
            script_timeout: Duration::from_secs(60),
            login_script: DEFAULT_LOGIN_SCRIPT.to_string(),
            bet_script: DEFAULT_BET_SCRIPT.to_string(),
        }
    }
}

pub struct DriverProvider {
    core: ProviderCore,
    http: Client,
    settings: DriverSettings,
    session: Mutex<Option<String>>,
}

impl DriverProvider {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        settings: DriverSettings,
    ) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(settings.command_timeout)
            .user_agent("CROUPIER/0.1.0 (webdriver-client)")
            .build()
            .map_err(|e| ProviderError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            core: ProviderCore::new(name, priority),
            http,
            settings,
            session: Mutex::new(None),
        })
    }

    pub fn from_config(config: &DriverConfig) -> ProviderResult<Self> {
        let settings = DriverSettings {
            webdriver_url: config.webdriver_url.clone(),
            browser: config.browser.clone(),
            headless: config.headless,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            script_timeout: Duration::from_millis(config.script_timeout_ms),
            login_script: config
                .login_script
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN_SCRIPT.to_string()),
            bet_script: config
                .bet_script
                .clone()
                .unwrap_or_else(|| DEFAULT_BET_SCRIPT.to_string()),
        };
        Self::new("driver", config.priority, settings)
    }

    /// Live WebDriver session id, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session.lock().clone()
    }

    fn capabilities(&self) -> Value {
        let mut always_match = json!({ "browserName": self.settings.browser });
        if self.settings.headless {
            let (key, arg) = match self.settings.browser.as_str() {
                "firefox" => ("moz:firefoxOptions", "-headless"),
                _ => ("goog:chromeOptions", "--headless=new"),
            };
            always_match[key] = json!({ "args": [arg] });
        }
        json!({ "capabilities": { "alwaysMatch": always_match } })
    }

    fn session_path(session_id: &str, suffix: &str) -> String {
        format!("/session/{}{suffix}", urlencoding::encode(session_id))
    }

    // -- Wire helpers ------------------------------------------------------

    /// Send one WebDriver command and unwrap its `value`.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> ProviderResult<Value> {
        let url = format!("{}{path}", self.settings.webdriver_url.trim_end_matches('/'));
        debug!(method = %method, url = %url, "WebDriver command");

        let mut request = self.http.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    operation: path.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                ProviderError::Connection(format!("WebDriver request to {url} failed: {e}"))
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let payload: WdResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::Protocol(format!("WebDriver {path} returned {status}: {e}"))
        })?;

        if status.is_success() {
            return Ok(payload.value);
        }

        let wd_error: WdError = serde_json::from_value(payload.value).unwrap_or(WdError {
            error: status.to_string(),
            message: text,
        });
        Err(self.classify(wd_error, path, timeout))
    }

    fn classify(&self, wd_error: WdError, path: &str, timeout: Duration) -> ProviderError {
        match wd_error.error.as_str() {
            "invalid session id" => {
                self.session.lock().take();
                self.core
                    .connection_lost(format!("browser session lost: {}", wd_error.message));
                ProviderError::NotConnected(self.core.name().to_string())
            }
            "script timeout" | "timeout" => ProviderError::Timeout {
                operation: path.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
            other => ProviderError::Protocol(format!("{other}: {}", wd_error.message)),
        }
    }

    /// Run an async script in the page and decode its completion value.
    async fn run_script(&self, session_id: &str, script: &str, arg: Value) -> ProviderResult<ScriptReply> {
        let value = self
            .command(
                Method::POST,
                &Self::session_path(session_id, "/execute/async"),
                Some(json!({ "script": script, "args": [arg] })),
                self.settings.script_timeout + self.settings.command_timeout,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Protocol(format!("malformed script reply: {e}")))
    }

    fn active_session(&self) -> ProviderResult<String> {
        self.session
            .lock()
            .clone()
            .ok_or_else(|| ProviderError::NotConnected(self.core.name().to_string()))
    }

    async fn open_session(&self, credentials: &Credentials) -> ProviderResult<()> {
        let value = self
            .command(
                Method::POST,
                "/session",
                Some(self.capabilities()),
                self.settings.command_timeout,
            )
            .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Protocol("new session reply has no sessionId".into()))?
            .to_string();
        *self.session.lock() = Some(session_id.clone());
        debug!(provider = %self.core.name(), session = %session_id, "WebDriver session created");

        self.command(
            Method::POST,
            &Self::session_path(&session_id, "/timeouts"),
            Some(json!({ "script": self.settings.script_timeout.as_millis() as u64 })),
            self.settings.command_timeout,
        )
        .await?;

        self.command(
            Method::POST,
            &Self::session_path(&session_id, "/url"),
            Some(json!({ "url": credentials.endpoint })),
            self.settings.command_timeout,
        )
        .await?;

        let reply = self
            .run_script(
                &session_id,
                &self.settings.login_script,
                json!({
                    "username": credentials.username,
                    "password": credentials.secret(),
                    "site": credentials.site,
                }),
            )
            .await?;
        if !reply.ok {
            return Err(ProviderError::LoginRejected(
                reply.error.unwrap_or_else(|| "login script reported failure".into()),
            ));
        }
        Ok(())
    }

    /// Best-effort `DELETE /session/{id}`.
    async fn close_session(&self, session_id: &str) {
        if let Err(e) = self
            .command(
                Method::DELETE,
                &Self::session_path(session_id, ""),
                None,
                self.settings.command_timeout,
            )
            .await
        {
            warn!(provider = %self.core.name(), error = %e, "Failed to delete WebDriver session");
        }
    }

    async fn place_bet(&self, request: &ActionRequest) -> ProviderResult<BetOutcome> {
        let session_id = self.active_session()?;
        let bet = BetPayload {
            table_id: request.table_id.clone(),
            selections: request.selections.clone(),
            total_amount: request.total_amount,
        };
        let arg = serde_json::to_value(&bet).map_err(|e| ProviderError::Protocol(e.to_string()))?;

        let reply = self
            .run_script(&session_id, &self.settings.bet_script, arg)
            .await?;
        if !reply.ok {
            return Err(ProviderError::Execution(
                reply.error.unwrap_or_else(|| "bet script reported failure".into()),
            ));
        }

        let data = reply
            .data
            .ok_or_else(|| ProviderError::Protocol("bet script returned no data".into()))?;
        let settlement: BetSettlement = serde_json::from_value(data)
            .map_err(|e| ProviderError::Protocol(format!("malformed settlement: {e}")))?;
        Ok(settlement.into())
    }
}

#[async_trait]
impl BettingProvider for DriverProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn priority(&self) -> u32 {
        self.core.priority()
    }

    /// Configuration check only; never touches the network.
    fn is_available(&self) -> bool {
        !self.settings.browser.is_empty() && reqwest::Url::parse(&self.settings.webdriver_url).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn connect(&self, credentials: &Credentials) -> ProviderResult<()> {
        if self.core.is_connected() {
            return Ok(());
        }

        info!(
            provider = %self.core.name(),
            url = %self.settings.webdriver_url,
            browser = %self.settings.browser,
            "Connecting browser driver"
        );
        match self.open_session(credentials).await {
            Ok(()) => {
                self.core.session_started();
                Ok(())
            }
            Err(e) => {
                warn!(provider = %self.core.name(), error = %e, "Browser driver connect failed");
                let leftover = self.session.lock().take();
                if let Some(session_id) = leftover {
                    self.close_session(&session_id).await;
                }
                self.core.report_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let was_connected = self.core.set_connected(false);
        let session = self.session.lock().take();
        if let Some(session_id) = &session {
            self.close_session(session_id).await;
        }
        if was_connected || session.is_some() {
            info!(provider = %self.core.name(), "Browser driver disconnected");
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
