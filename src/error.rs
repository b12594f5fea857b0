//! Typed errors for each layer of the core.
//!
//! Providers, the engine and the manager each get their own enum so a
//! caller can match on what actually went wrong. The binary edge wraps
//! everything in `anyhow`.

use thiserror::Error;

use crate::risk::RiskViolation;

/// Errors raised by a backend adapter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider {0} is not connected")]
    NotConnected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Precondition violations that `execute` returns as errors rather
    /// than folding into a failed result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::NotConnected(_) | ProviderError::InvalidRequest(_)
        )
    }
}

/// Errors raised by the execution engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is paused")]
    Paused,

    #[error("no active provider")]
    NoActiveProvider,

    #[error("no providers registered")]
    NoProviders,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("all providers failed to connect: {}", format_failures(.0))]
    AllProvidersFailed(Vec<(String, String)>),

    #[error("all providers exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

fn format_failures(failures: &[(String, String)]) -> String {
    if failures.is_empty() {
        return "none available".to_string();
    }
    failures
        .iter()
        .map(|(name, reason)| format!("{name}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the automation manager.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AutomationError {
    #[error("automation is disabled")]
    Disabled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("risk limit violated: {0}")]
    Risk(#[from] RiskViolation),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;
pub type AutomationResult<T> = std::result::Result<T, AutomationError>;
