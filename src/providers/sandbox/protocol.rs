//! Wire messages exchanged with the isolated table context.
//!
//! Every frame is a JSON object `{type, requestId, data|error}`. Commands
//! flow host → context (`LOGIN`, `PLACE_BET`); everything else flows
//! context → host.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{BetOutcome, Selection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxMessage {
    /// Bootstrap program is listening.
    Ready,
    Login {
        #[serde(rename = "requestId")]
        request_id: String,
        data: LoginPayload,
    },
    LoginResult {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<LoginAck>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PlaceBet {
        #[serde(rename = "requestId")]
        request_id: String,
        data: BetPayload,
    },
    BetResult {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<BetSettlement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: String,
    },
    Log {
        data: LogPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    pub site: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAck {
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetPayload {
    pub table_id: String,
    pub selections: Vec<Selection>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetSettlement {
    pub bet_id: String,
    pub winning_number: u8,
    pub winning_color: String,
    pub payout: Decimal,
    pub profit: Decimal,
    #[serde(default)]
    pub balance: Option<Decimal>,
}

impl From<BetSettlement> for BetOutcome {
    fn from(s: BetSettlement) -> Self {
        BetOutcome {
            bet_id: Some(s.bet_id),
            winning_value: Some(s.winning_number.to_string()),
            winning_category: Some(s.winning_color),
            payout: s.payout,
            profit: s.profit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: String,
    pub message: String,
}

impl SandboxMessage {
    /// Correlation id, if this frame carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SandboxMessage::Login { request_id, .. }
            | SandboxMessage::LoginResult { request_id, .. }
            | SandboxMessage::PlaceBet { request_id, .. }
            | SandboxMessage::BetResult { request_id, .. } => Some(request_id),
            SandboxMessage::Error { request_id, .. } => request_id.as_deref(),
            SandboxMessage::Ready | SandboxMessage::Log { .. } => None,
        }
    }

    /// Wire name of the frame.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxMessage::Ready => "READY",
            SandboxMessage::Login { .. } => "LOGIN",
            SandboxMessage::LoginResult { .. } => "LOGIN_RESULT",
            SandboxMessage::PlaceBet { .. } => "PLACE_BET",
            SandboxMessage::BetResult { .. } => "BET_RESULT",
            SandboxMessage::Error { .. } => "ERROR",
            SandboxMessage::Log { .. } => "LOG",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn log(level: &str, message: impl Into<String>) -> Self {
        SandboxMessage::Log {
            data: LogPayload {
                level: level.to_string(),
                message: message.into(),
            },
        }
    }
}
