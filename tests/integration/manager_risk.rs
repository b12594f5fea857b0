//! Risk governance through the automation manager.

use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use croupier::config::AutomationConfig;
use croupier::error::{AutomationError, EngineError};
use croupier::events::AutomationEvent;
use croupier::providers::stub::{StubOutcome, StubProvider};
use croupier::providers::BettingProvider;
use croupier::risk::RiskViolation;
use croupier::types::SessionStatus;

use crate::helpers::{creds, manager, notification_names, red};

fn limits() -> AutomationConfig {
    AutomationConfig {
        max_bet_amount: dec!(300),
        max_loss_per_session: dec!(1000),
        stop_loss_percentage: 80.0,
        take_profit_percentage: 90.0,
        retry_attempts: 1,
        retry_delay_ms: 1,
        ..AutomationConfig::default()
    }
}

#[tokio::test]
async fn test_four_losses_of_250_terminate_the_session() {
    let stub = Arc::new(StubProvider::new("stub", 1).always(StubOutcome::Lose));
    let manager = manager(vec![stub.clone() as Arc<dyn BettingProvider>], limits());
    let mut rx = manager.subscribe();
    assert_ok!(manager.start(creds()).await);

    let mut terminations = Vec::new();
    for _ in 0..4 {
        assert_ok!(manager.place_bet(red(dec!(250))).await);
        for n in rx.drain() {
            if let AutomationEvent::SessionTerminated { profit, .. } = n.event {
                terminations.push(profit);
            }
        }
    }

    assert_eq!(terminations, vec![dec!(-1000)]);
    let session = manager.current_session().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(session.total_actions, 4);
    assert_eq!(session.total_wagered, dec!(1000));
    assert!(!stub.is_connected());
}

#[tokio::test]
async fn test_rejections_never_reach_the_provider() {
    let stub = Arc::new(StubProvider::new("stub", 1));
    let manager = manager(vec![stub.clone() as Arc<dyn BettingProvider>], limits());
    let mut rx = manager.subscribe();
    assert_ok!(manager.start(creds()).await);
    rx.drain();

    let err = assert_err!(manager.place_bet(red(dec!(301))).await);
    assert!(matches!(err, AutomationError::Risk(RiskViolation::AmountAboveLimit { .. })));

    let err = assert_err!(manager.place_bet(red(dec!(50)).with_max_loss(dec!(20))).await);
    assert!(matches!(err, AutomationError::Risk(RiskViolation::ActionLossCap { .. })));

    let mut empty = red(dec!(10));
    empty.selections.clear();
    let err = assert_err!(manager.place_bet(empty).await);
    assert!(matches!(err, AutomationError::Engine(EngineError::InvalidRequest(_))));

    assert_eq!(stub.execute_calls(), 0);
    assert_eq!(manager.metrics().sessions_today, 0);
    assert_eq!(notification_names(&mut rx), vec!["bet_rejected", "bet_rejected"]);
}

#[tokio::test]
async fn test_understated_total_cannot_slip_past_the_bet_cap() {
    let stub = Arc::new(StubProvider::new("stub", 1).always(StubOutcome::Win));
    let manager = manager(
        vec![stub.clone() as Arc<dyn BettingProvider>],
        AutomationConfig {
            max_bet_amount: dec!(10),
            ..limits()
        },
    );
    assert_ok!(manager.start(creds()).await);

    let mut request = red(dec!(5000));
    request.total_amount = dec!(1);
    let err = assert_err!(manager.place_bet(request).await);
    assert!(matches!(err, AutomationError::Engine(EngineError::InvalidRequest(_))));

    assert_eq!(stub.execute_calls(), 0);
    assert_eq!(manager.session_profit(), dec!(0));
    assert_eq!(manager.metrics().sessions_today, 0);
}

#[tokio::test]
async fn test_error_rate_gate_blocks_after_failures() {
    let flaky = Arc::new(StubProvider::new("flaky", 1).always(StubOutcome::Fail("table jammed".into())));
    let manager = manager(vec![flaky.clone() as Arc<dyn BettingProvider>], limits());
    assert_ok!(manager.start(creds()).await);

    let err = assert_err!(manager.place_bet(red(dec!(10))).await);
    assert!(matches!(err, AutomationError::Engine(EngineError::Exhausted { attempts: 1, .. })));
    assert!(manager.metrics().error_rate > 80.0);

    // Restart; the error rate carries over and gates the next wager.
    assert_ok!(manager.start(creds()).await);
    let err = assert_err!(manager.place_bet(red(dec!(10))).await);
    assert!(matches!(err, AutomationError::Risk(RiskViolation::ErrorRateTooHigh { .. })));
    assert_eq!(flaky.execute_calls(), 1);

    manager.reset_metrics();
    flaky.push_outcome(StubOutcome::Win);
    assert!(assert_ok!(manager.place_bet(red(dec!(10))).await).success);
}

#[tokio::test]
async fn test_event_stream_for_a_normal_session() {
    let stub = Arc::new(StubProvider::new("stub", 1).with_outcomes([StubOutcome::Lose, StubOutcome::Win]));
    let manager = manager(vec![stub as Arc<dyn BettingProvider>], limits());
    let mut rx = manager.subscribe();

    assert_ok!(manager.start(creds()).await);
    assert_ok!(manager.place_bet(red(dec!(10))).await);
    assert_ok!(manager.place_bet(red(dec!(10))).await);
    manager.stop().await;

    let names = notification_names(&mut rx);
    assert_eq!(names.first(), Some(&"provider_connected"));
    assert!(names.contains(&"started"));
    assert_eq!(names.iter().filter(|n| **n == "bet_placed").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "bet_completed").count(), 2);
    assert_eq!(names.last(), Some(&"stopped"));

    let status = manager.detailed_status();
    assert_eq!(status.metrics.total_profit, dec!(0));
    assert_eq!(status.session.unwrap().winning_actions, 1);
}
