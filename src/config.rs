//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The account secret is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::risk::RiskLimits;
use crate::types::Credentials;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub automation: AutomationConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// Limits and behaviour of the automation manager. Replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub enabled: bool,
    /// Provider tried first at start.
    pub preferred_provider: Option<String>,
    pub max_bet_amount: Decimal,
    pub max_loss_per_session: Decimal,
    /// Warn when loss / (gain + loss) reaches this share (percent).
    pub stop_loss_percentage: f64,
    /// Warn when gain / (gain + loss) reaches this share (percent).
    pub take_profit_percentage: f64,
    /// Minimum pause between two wagers.
    pub cooldown_ms: u64,
    /// Attempts per provider before failing over.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub notifications: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preferred_provider: None,
            max_bet_amount: dec!(100),
            max_loss_per_session: dec!(500),
            stop_loss_percentage: 80.0,
            take_profit_percentage: 90.0,
            cooldown_ms: 0,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            notifications: true,
            log_level: "info".to_string(),
        }
    }
}

impl AutomationConfig {
    /// Reject limits that would make every check meaningless.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_bet_amount <= Decimal::ZERO {
            return Err("max_bet_amount must be positive".to_string());
        }
        if self.max_loss_per_session <= Decimal::ZERO {
            return Err("max_loss_per_session must be positive".to_string());
        }
        for (name, value) in [
            ("stop_loss_percentage", self.stop_loss_percentage),
            ("take_profit_percentage", self.take_profit_percentage),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(format!("{name} must be in (0, 100], got {value}"));
            }
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_bet_amount: self.max_bet_amount,
            max_loss_per_session: self.max_loss_per_session,
            stop_loss_percentage: self.stop_loss_percentage,
            take_profit_percentage: self.take_profit_percentage,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_retries: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            preferred_provider: self.preferred_provider.clone(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    pub username: String,
    pub endpoint: String,
    pub site: String,
    /// Name of the env var holding the account secret.
    pub secret_env: String,
}

impl CredentialsConfig {
    /// Build credentials, resolving the secret from the environment.
    pub fn resolve(&self) -> Result<Credentials> {
        let secret = AppConfig::resolve_env(&self.secret_env)?;
        Ok(Credentials::new(
            self.username.clone(),
            self.endpoint.clone(),
            secret,
            self.site.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub priority: u32,
    /// Balance of the simulated table account.
    pub starting_balance: f64,
    /// Fixed wheel seed for reproducible runs.
    pub seed: Option<u64>,
    pub connect_timeout_ms: u64,
    pub login_timeout_ms: u64,
    pub bet_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 1,
            starting_balance: 1000.0,
            seed: None,
            connect_timeout_ms: 30_000,
            login_timeout_ms: 30_000,
            bet_timeout_ms: 60_000,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DriverConfig {
    pub enabled: bool,
    pub priority: u32,
    pub webdriver_url: String,
    pub browser: String,
    pub headless: bool,
    pub command_timeout_ms: u64,
    pub script_timeout_ms: u64,
    /// Async login script; the built-in hook script when unset.
    pub login_script: Option<String>,
    /// Async bet script; the built-in hook script when unset.
    pub bet_script: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 2,
            webdriver_url: "http://localhost:9515".to_string(),
            browser: "chrome".to_string(),
            headless: true,
            command_timeout_ms: 30_000,
            script_timeout_ms: 60_000,
            login_script: None,
            bet_script: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config
            .automation
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid [automation] section")?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
