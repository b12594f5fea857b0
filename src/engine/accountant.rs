//! Accountant: session bookkeeping and rolling metrics.
//!
//! Applied once per completed execution attempt, successful or not.
//! Failed attempts still count toward totals and the rolling averages so
//! `win_rate + error_rate` stays at 100.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{ActionRequest, ActionResult, Metrics, Session};

pub struct Accountant;

impl Accountant {
    /// Record one attempt against the session and the metrics.
    pub fn record(
        session: &mut Session,
        metrics: &mut Metrics,
        request: &ActionRequest,
        result: &ActionResult,
    ) {
        Self::record_session(session, request, result);
        Self::record_metrics(metrics, result);

        debug!(
            session = %session.id,
            actions = session.total_actions,
            profit = %session.profit,
            win_rate = format!("{:.1}%", metrics.win_rate),
            error_rate = format!("{:.1}%", metrics.error_rate),
            "Attempt recorded"
        );
    }

    fn record_session(session: &mut Session, request: &ActionRequest, result: &ActionResult) {
        session.total_actions += 1;
        session.total_wagered += request.total_amount;
        session.active_table = Some(request.table_id.clone());
        if !request.strategy.is_empty() {
            session.active_strategy = Some(request.strategy.clone());
        }

        if result.success {
            session.total_won += result.payout.unwrap_or(Decimal::ZERO);
            session.profit += result.net_profit();
            if result.is_win() {
                session.winning_actions += 1;
            }
        }

        session.win_rate = session.winning_actions as f64 / session.total_actions as f64 * 100.0;
    }

    fn record_metrics(metrics: &mut Metrics, result: &ActionResult) {
        metrics.sessions_today += 1;
        let n = metrics.sessions_today as f64;

        let profit = result.net_profit();
        metrics.total_profit += profit;
        if profit > Decimal::ZERO {
            metrics.gross_gain += profit;
        } else {
            metrics.gross_loss += -profit;
        }

        metrics.average_action_time =
            running_average(metrics.average_action_time, result.duration_ms as f64, n);
        let (win, error) = if result.success { (100.0, 0.0) } else { (0.0, 100.0) };
        metrics.win_rate = running_average(metrics.win_rate, win, n);
        metrics.error_rate = running_average(metrics.error_rate, error, n);
        metrics.last_update = Some(Utc::now());
    }
}

/// `(avg × (n − 1) + sample) / n`
fn running_average(avg: f64, sample: f64, n: f64) -> f64 {
    (avg * (n - 1.0) + sample) / n
}
