//! Risk governance.
//!
//! Pre-execution checks reject a wager before it reaches any provider.
//! Post-execution assessment turns the rolling metrics into alerts; a
//! terminal alert means the session must be stopped.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{ActionRequest, Metrics};

/// Error rate above which new wagers are refused (percent).
pub const MAX_ERROR_RATE: f64 = 80.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub max_bet_amount: Decimal,
    pub max_loss_per_session: Decimal,
    pub stop_loss_percentage: f64,
    pub take_profit_percentage: f64,
}

/// Why a wager was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskViolation {
    #[error("wager amount ${amount:.2} exceeds the maximum of ${limit:.2}")]
    AmountAboveLimit { amount: Decimal, limit: Decimal },

    #[error("wager amount ${amount:.2} exceeds its own loss cap of ${cap:.2}")]
    ActionLossCap { amount: Decimal, cap: Decimal },

    #[error("session loss limit reached: profit ${profit:.2} is below -${limit:.2}")]
    SessionLossLimit { profit: Decimal, limit: Decimal },

    #[error("error rate {rate:.1}% is above {limit:.0}%")]
    ErrorRateTooHigh { rate: f64, limit: f64 },
}

/// Outcome of a post-execution assessment.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskAlert {
    StopLossWarning { loss_percentage: f64, threshold: f64 },
    TakeProfitReached { gain_percentage: f64, threshold: f64 },
    /// Terminal: the session must stop.
    SessionLossLimit { net_loss: Decimal, limit: Decimal },
}

impl RiskAlert {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RiskAlert::SessionLossLimit { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RiskAlert::StopLossWarning { .. } => "stop_loss",
            RiskAlert::TakeProfitReached { .. } => "take_profit",
            RiskAlert::SessionLossLimit { .. } => "session_loss_limit",
        }
    }

    pub fn percentage(&self) -> f64 {
        match self {
            RiskAlert::StopLossWarning {
                loss_percentage, ..
            } => *loss_percentage,
            RiskAlert::TakeProfitReached {
                gain_percentage, ..
            } => *gain_percentage,
            RiskAlert::SessionLossLimit { .. } => 100.0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RiskAlert::StopLossWarning {
                loss_percentage,
                threshold,
            } => format!("loss share {loss_percentage:.1}% reached the stop-loss threshold of {threshold:.1}%"),
            RiskAlert::TakeProfitReached {
                gain_percentage,
                threshold,
            } => format!("gain share {gain_percentage:.1}% reached the take-profit threshold of {threshold:.1}%"),
            RiskAlert::SessionLossLimit { net_loss, limit } => {
                format!("net loss ${net_loss:.2} reached the session limit of ${limit:.2}")
            }
        }
    }
}

pub struct RiskGovernor {
    limits: RiskLimits,
}

impl RiskGovernor {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Pre-execution check against the request and current metrics.
    pub fn validate(&self, request: &ActionRequest, metrics: &Metrics) -> Result<(), RiskViolation> {
        if request.total_amount > self.limits.max_bet_amount {
            return Err(RiskViolation::AmountAboveLimit {
                amount: request.total_amount,
                limit: self.limits.max_bet_amount,
            });
        }

        if let Some(cap) = request.max_loss {
            if request.total_amount > cap {
                return Err(RiskViolation::ActionLossCap {
                    amount: request.total_amount,
                    cap,
                });
            }
        }

        if metrics.total_profit < -self.limits.max_loss_per_session {
            return Err(RiskViolation::SessionLossLimit {
                profit: metrics.total_profit,
                limit: self.limits.max_loss_per_session,
            });
        }

        if metrics.error_rate > MAX_ERROR_RATE {
            return Err(RiskViolation::ErrorRateTooHigh {
                rate: metrics.error_rate,
                limit: MAX_ERROR_RATE,
            });
        }

        Ok(())
    }

    /// Post-execution assessment. Warnings first, terminal alert last.
    pub fn assess(&self, metrics: &Metrics) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        let loss_percentage = metrics.loss_percentage();
        if metrics.gross_loss > Decimal::ZERO && loss_percentage >= self.limits.stop_loss_percentage {
            alerts.push(RiskAlert::StopLossWarning {
                loss_percentage,
                threshold: self.limits.stop_loss_percentage,
            });
        }

        let gain_percentage = metrics.gain_percentage();
        if metrics.gross_gain > Decimal::ZERO && gain_percentage >= self.limits.take_profit_percentage {
            alerts.push(RiskAlert::TakeProfitReached {
                gain_percentage,
                threshold: self.limits.take_profit_percentage,
            });
        }

        let net_loss = metrics.net_loss();
        if net_loss > Decimal::ZERO && net_loss >= self.limits.max_loss_per_session {
            alerts.push(RiskAlert::SessionLossLimit {
                net_loss,
                limit: self.limits.max_loss_per_session,
            });
        }

        alerts
    }
}
