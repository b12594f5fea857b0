//! Engine selection, retry and failover against stub providers.

use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use croupier::engine::EngineState;
use croupier::error::EngineError;
use croupier::providers::stub::{StubOutcome, StubProvider};
use croupier::providers::BettingProvider;
use croupier::types::SessionStatus;

use crate::helpers::{creds, engine, record_engine_events, red};

#[tokio::test]
async fn test_failover_follows_priority_order() {
    let primary = Arc::new(StubProvider::new("primary", 1).always(StubOutcome::Fail("jammed".into())));
    let secondary = Arc::new(StubProvider::new("secondary", 2).unavailable());
    let tertiary = Arc::new(StubProvider::new("tertiary", 3));

    // Registration order does not matter; priority does.
    let engine = engine(&[tertiary.clone(), secondary.clone(), primary.clone()]);
    let events = record_engine_events(&engine);

    assert_ok!(engine.start(creds()).await);
    assert_eq!(engine.active_provider().as_deref(), Some("primary"));

    let result = assert_ok!(engine.execute(&red(dec!(10))).await);
    assert!(result.success);
    assert_eq!(engine.active_provider().as_deref(), Some("tertiary"));
    assert_eq!(primary.execute_calls(), 2);
    assert_eq!(secondary.connect_calls(), 0);
    assert_eq!(tertiary.execute_calls(), 1);

    assert_eq!(
        *events.lock(),
        vec!["started", "failed", "failed", "switched", "completed"]
    );
}

#[tokio::test]
async fn test_failover_skips_provider_that_cannot_connect() {
    let a = Arc::new(StubProvider::new("a", 1).always(StubOutcome::Fail("down".into())));
    let b = Arc::new(StubProvider::new("b", 2));
    let c = Arc::new(StubProvider::new("c", 3));
    let engine = engine(&[a.clone(), b.clone(), c.clone()]);

    assert_ok!(engine.start(creds()).await);
    b.set_connect_failure(Some("refused".into()));

    assert_ok!(engine.execute(&red(dec!(5))).await);
    assert_eq!(b.connect_calls(), 1);
    assert_eq!(engine.active_provider().as_deref(), Some("c"));
}

#[tokio::test]
async fn test_exhaustion_then_restart() {
    let a = Arc::new(StubProvider::new("a", 1).always(StubOutcome::Fail("down".into())));
    let engine = engine(&[a.clone()]);
    let events = record_engine_events(&engine);

    assert_ok!(engine.start(creds()).await);
    let err = assert_err!(engine.execute(&red(dec!(10))).await);
    assert_eq!(
        err,
        EngineError::Exhausted {
            attempts: 2,
            last_error: "execution failed: down".into()
        }
    );
    assert_eq!(engine.state(), EngineState::Error);
    assert_eq!(events.lock().last(), Some(&"exhausted"));

    let metrics = engine.metrics();
    assert_eq!(metrics.sessions_today, 2);
    assert!((metrics.error_rate - 100.0).abs() < 1e-9);
    assert!((metrics.win_rate + metrics.error_rate - 100.0).abs() < 1e-9);

    // A new start is allowed from the error state.
    a.push_outcome(StubOutcome::Win);
    assert_ok!(engine.start(creds()).await);
    assert_eq!(engine.current_session().unwrap().status, SessionStatus::Active);
    assert_ok!(engine.execute(&red(dec!(10))).await);
}

#[tokio::test]
async fn test_concurrent_executes_are_serialized() {
    let a = Arc::new(StubProvider::new("a", 1).with_delay(std::time::Duration::from_millis(5)));
    let engine = Arc::new(engine(&[a.clone()]));
    assert_ok!(engine.start(creds()).await);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.execute(&red(dec!(1))).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }

    let session = engine.current_session().unwrap();
    assert_eq!(session.total_actions, 5);
    assert_eq!(session.total_wagered, dec!(5));
    assert_eq!(a.status().total_actions, 5);
}

#[tokio::test]
async fn test_provider_error_outside_execute_heals() {
    let a = Arc::new(StubProvider::new("a", 1));
    let b = Arc::new(StubProvider::new("b", 2));
    let engine = engine(&[a.clone(), b.clone()]);
    assert_ok!(engine.start(creds()).await);

    a.raise_error("table closed by operator");

    for _ in 0..100 {
        if engine.active_provider().as_deref() == Some("b") {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(engine.active_provider().as_deref(), Some("b"));
    assert!(!a.is_connected());
    assert!(b.is_connected());
}
