//! Shared types for the CROUPIER core.
//!
//! These types form the data contracts exchanged between providers,
//! the execution engine and the automation manager. They are kept free
//! of behaviour beyond validation and simple derivations so every layer
//! can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login material for a provider session.
///
/// Supplied once at session start and never mutated. The secret is
/// redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    /// Site endpoint (lobby URL) the provider should open.
    pub endpoint: String,
    /// Backend-site variant tag, e.g. "roulette-eu".
    pub site: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        endpoint: impl Into<String>,
        secret: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            endpoint: endpoint.into(),
            site: site.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Expose the secret for the one place that has to send it.
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Kind of wager placed on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    /// Single number, value "0".."36".
    Straight,
    /// "red" | "black"
    Color,
    /// "even" | "odd"
    Parity,
    /// "low" (1-18) | "high" (19-36)
    Range,
    /// "1" | "2" | "3"
    Dozen,
    /// "1" | "2" | "3"
    Column,
}

impl fmt::Display for SelectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionType::Straight => write!(f, "straight"),
            SelectionType::Color => write!(f, "color"),
            SelectionType::Parity => write!(f, "parity"),
            SelectionType::Range => write!(f, "range"),
            SelectionType::Dozen => write!(f, "dozen"),
            SelectionType::Column => write!(f, "column"),
        }
    }
}

/// One chip placement inside a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(rename = "type")]
    pub kind: SelectionType,
    pub value: String,
    pub amount: Decimal,
}

impl Selection {
    pub fn new(kind: SelectionType, value: impl Into<String>, amount: Decimal) -> Self {
        Self {
            kind,
            value: value.into(),
            amount,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ${:.2}", self.kind, self.value, self.amount)
    }
}

/// A wager to place on a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub table_id: String,
    pub selections: Vec<Selection>,
    pub total_amount: Decimal,
    /// Label of the strategy that produced this request.
    #[serde(default)]
    pub strategy: String,
    /// Strategy confidence (0–1).
    #[serde(default)]
    pub confidence: f64,
    /// Optional cap on what this single action may lose.
    #[serde(default)]
    pub max_loss: Option<Decimal>,
    /// Stop the session after this action if it wins.
    #[serde(default)]
    pub stop_on_win: bool,
}

impl ActionRequest {
    /// Build a request whose total is the sum of its selections.
    pub fn new(table_id: impl Into<String>, selections: Vec<Selection>) -> Self {
        let total_amount = selections.iter().map(|s| s.amount).sum();
        Self {
            table_id: table_id.into(),
            selections,
            total_amount,
            strategy: "manual".to_string(),
            confidence: 1.0,
            max_loss: None,
            stop_on_win: false,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>, confidence: f64) -> Self {
        self.strategy = strategy.into();
        self.confidence = confidence;
        self
    }

    pub fn with_max_loss(mut self, max_loss: Decimal) -> Self {
        self.max_loss = Some(max_loss);
        self
    }

    pub fn with_stop_on_win(mut self, stop_on_win: bool) -> Self {
        self.stop_on_win = stop_on_win;
        self
    }

    /// Check the request shape. Must pass before any backend I/O.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.selections.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "request has no selections".to_string(),
            ));
        }
        if self.total_amount <= Decimal::ZERO {
            return Err(ProviderError::InvalidRequest(format!(
                "total amount must be positive, got {}",
                self.total_amount
            )));
        }
        if let Some(bad) = self.selections.iter().find(|s| s.amount <= Decimal::ZERO) {
            return Err(ProviderError::InvalidRequest(format!(
                "selection {bad} has a non-positive amount"
            )));
        }
        let staked: Decimal = self.selections.iter().map(|s| s.amount).sum();
        if staked != self.total_amount {
            return Err(ProviderError::InvalidRequest(format!(
                "total amount {} does not match selection stakes {staked}",
                self.total_amount
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.selections.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "[{}] {} total=${:.2} ({})",
            self.table_id,
            parts.join(", "),
            self.total_amount,
            self.strategy,
        )
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Settled outcome reported by a provider before it is wrapped into an
/// [`ActionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetOutcome {
    pub bet_id: Option<String>,
    pub winning_value: Option<String>,
    pub winning_category: Option<String>,
    pub payout: Decimal,
    pub profit: Decimal,
}

/// Result of one execution attempt.
///
/// A failed result always carries `error`; a successful one always
/// carries `payout` and `profit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    pub bet_id: Option<String>,
    pub winning_value: Option<String>,
    pub winning_category: Option<String>,
    pub payout: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ActionResult {
    pub fn settled(outcome: BetOutcome, duration_ms: u64) -> Self {
        Self {
            success: true,
            bet_id: outcome.bet_id,
            winning_value: outcome.winning_value,
            winning_category: outcome.winning_category,
            payout: Some(outcome.payout),
            profit: Some(outcome.profit),
            error: None,
            timestamp: Utc::now(),
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            bet_id: None,
            winning_value: None,
            winning_category: None,
            payout: None,
            profit: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
            duration_ms,
        }
    }

    /// Profit of a settled action, zero for failures.
    pub fn net_profit(&self) -> Decimal {
        self.profit.unwrap_or(Decimal::ZERO)
    }

    /// Whether the action settled with a positive profit.
    pub fn is_win(&self) -> bool {
        self.success && self.net_profit() > Decimal::ZERO
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "settled {} winning={} payout=${:.2} profit=${:.2} ({}ms)",
                self.bet_id.as_deref().unwrap_or("-"),
                self.winning_value.as_deref().unwrap_or("-"),
                self.payout.unwrap_or_default(),
                self.net_profit(),
                self.duration_ms,
            )
        } else {
            write!(
                f,
                "failed: {} ({}ms)",
                self.error.as_deref().unwrap_or("unknown error"),
                self.duration_ms,
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Stopped,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// One continuous engine run from `start` to `stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_actions: u64,
    /// Actions that settled with a positive profit.
    pub winning_actions: u64,
    pub total_wagered: Decimal,
    /// Sum of payouts returned by settled actions.
    pub total_won: Decimal,
    /// Running net profit (may be negative).
    pub profit: Decimal,
    /// Profitable actions / total actions × 100.
    pub win_rate: f64,
    pub active_strategy: Option<String>,
    pub active_table: Option<String>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            total_actions: 0,
            winning_actions: 0,
            total_wagered: Decimal::ZERO,
            total_won: Decimal::ZERO,
            profit: Decimal::ZERO,
            win_rate: 0.0,
            active_strategy: None,
            active_table: None,
            status: SessionStatus::Active,
        }
    }

    /// Stamp the end time and final status.
    pub fn close(&mut self, status: SessionStatus) {
        self.status = status;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} [{}] actions={} wagered=${:.2} profit=${:.2} win_rate={:.1}%",
            self.id, self.status, self.total_actions, self.total_wagered, self.profit, self.win_rate,
        )
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Rolling engine metrics. Owned by the engine; callers get snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Running count of completed actions over the engine's lifetime.
    pub sessions_today: u64,
    /// Running net profit.
    pub total_profit: Decimal,
    /// Sum of positive profits.
    pub gross_gain: Decimal,
    /// Sum of absolute negative profits.
    pub gross_loss: Decimal,
    pub win_rate: f64,
    /// Milliseconds.
    pub average_action_time: f64,
    pub error_rate: f64,
    pub uptime_ms: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            sessions_today: 0,
            total_profit: Decimal::ZERO,
            gross_gain: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            win_rate: 0.0,
            average_action_time: 0.0,
            error_rate: 0.0,
            uptime_ms: 0,
            last_update: None,
        }
    }
}

impl Metrics {
    /// Net loss as a positive amount (zero while in profit).
    pub fn net_loss(&self) -> Decimal {
        if self.total_profit < Decimal::ZERO {
            -self.total_profit
        } else {
            Decimal::ZERO
        }
    }

    /// loss / (gain + loss) × 100, zero before any settled profit or loss.
    pub fn loss_percentage(&self) -> f64 {
        share_percentage(self.gross_loss, self.gross_gain + self.gross_loss)
    }

    /// gain / (gain + loss) × 100, zero before any settled profit or loss.
    pub fn gain_percentage(&self) -> f64 {
        share_percentage(self.gross_gain, self.gross_gain + self.gross_loss)
    }
}

fn share_percentage(part: Decimal, whole: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;

    if whole <= Decimal::ZERO {
        return 0.0;
    }
    (part / whole * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Provider status
// ---------------------------------------------------------------------------

/// Snapshot of a provider's health, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: String,
    /// Lower is tried first.
    pub priority: u32,
    pub available: bool,
    pub connected: bool,
    pub last_error: Option<String>,
    /// Average response time in milliseconds.
    pub response_time_ms: f64,
    /// successful / total × 100 (0 before any action).
    pub success_rate: f64,
    pub total_actions: u64,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (p{}) available={} connected={} success={:.0}% avg={:.0}ms",
            self.name,
            self.priority,
            self.available,
            self.connected,
            self.success_rate,
            self.response_time_ms,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
