//! The sandbox boundary: origin checks, timeouts and context death.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use croupier::config::AutomationConfig;
use croupier::engine::{EngineOptions, ExecutionEngine};
use croupier::error::EngineError;
use croupier::providers::sandbox::context::{ContextId, ContextPort, Envelope, SandboxProgram};
use croupier::providers::sandbox::protocol::{BetSettlement, LoginAck, SandboxMessage};
use croupier::providers::sandbox::table::{RouletteTable, TableProgram};
use croupier::providers::sandbox::{ProgramFactory, SandboxProvider, SandboxSettings};
use croupier::providers::stub::StubProvider;
use croupier::providers::BettingProvider;
use croupier::types::Credentials;

use crate::helpers::{creds, manager, notification_names, red};

/// What the test program does with a `PLACE_BET`.
#[derive(Clone, Copy)]
enum OnBet {
    /// Report the request id and never answer.
    Stall,
    /// Exit the context.
    Crash,
    /// Stop reading the inbox while keeping the context alive.
    Hang,
}

/// Accepts any login, then misbehaves on bets.
struct Rogue {
    on_bet: OnBet,
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SandboxProgram for Rogue {
    async fn run(self: Box<Self>, mut port: ContextPort) {
        port.post(&SandboxMessage::Ready).await;
        while let Some(raw) = port.recv().await {
            match SandboxMessage::decode(&raw) {
                Ok(SandboxMessage::Login { request_id, .. }) => {
                    port.post(&SandboxMessage::LoginResult {
                        request_id,
                        data: Some(LoginAck { balance: dec!(500) }),
                        error: None,
                    })
                    .await;
                }
                Ok(SandboxMessage::PlaceBet { request_id, .. }) => {
                    let _ = self.seen.send(request_id);
                    match self.on_bet {
                        OnBet::Stall => {}
                        OnBet::Crash => return,
                        OnBet::Hang => std::future::pending::<()>().await,
                    }
                }
                _ => {}
            }
        }
    }
}

fn rogue(on_bet: OnBet, settings: SandboxSettings) -> (SandboxProvider, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let factory: ProgramFactory = Arc::new(move |_: &Credentials| {
        Box::new(Rogue {
            on_bet,
            seen: seen_tx.clone(),
        }) as Box<dyn SandboxProgram>
    });
    (SandboxProvider::new("sandbox", 1, settings, factory), seen_rx)
}

fn forged_win(request_id: String) -> SandboxMessage {
    SandboxMessage::BetResult {
        request_id,
        data: Some(BetSettlement {
            bet_id: "FORGED".into(),
            winning_number: 3,
            winning_color: "red".into(),
            payout: dec!(1000),
            profit: dec!(990),
            balance: None,
        }),
        error: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_foreign_origin_frame_is_ignored_and_bet_times_out() {
    let settings = SandboxSettings {
        bet_timeout: Duration::from_secs(1),
        ..SandboxSettings::default()
    };
    let (provider, mut seen) = rogue(OnBet::Stall, settings);
    let provider = Arc::new(provider);
    assert_ok!(provider.connect(&creds()).await);

    let p = Arc::clone(&provider);
    let pending = tokio::spawn(async move { p.execute(&red(dec!(10))).await });

    let request_id = seen.recv().await.unwrap();
    assert_eq!(provider.pending_requests(), 1);

    // Correct id, wrong origin.
    let window = provider.window().unwrap();
    let forged = forged_win(request_id).encode().unwrap();
    window
        .send(Envelope {
            origin: ContextId::new(),
            body: forged,
        })
        .await
        .unwrap();

    let result = pending.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("PLACE_BET timed out after 1000ms")
    );
    assert_eq!(provider.pending_requests(), 0);
    assert!(provider.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_full_inbox_times_out_instead_of_blocking() {
    let settings = SandboxSettings {
        bet_timeout: Duration::from_millis(100),
        channel_capacity: 1,
        ..SandboxSettings::default()
    };
    let (provider, mut seen) = rogue(OnBet::Hang, settings);
    assert_ok!(provider.connect(&creds()).await);

    // First bet is read and never answered, second fills the inbox,
    // third cannot be enqueued at all.
    for _ in 0..3 {
        let result = tokio::time::timeout(Duration::from_secs(5), provider.execute(&red(dec!(10))))
            .await
            .expect("execute must not block past its timeout")
            .unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("PLACE_BET timed out after 100ms")
        );
        assert_eq!(provider.pending_requests(), 0);
    }
    assert!(seen.recv().await.is_some());
    assert!(provider.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_engine_retries_against_hung_context_are_bounded() {
    let settings = SandboxSettings {
        bet_timeout: Duration::from_millis(100),
        channel_capacity: 1,
        ..SandboxSettings::default()
    };
    let (provider, _seen) = rogue(OnBet::Hang, settings);
    let engine = ExecutionEngine::new(
        vec![Arc::new(provider) as Arc<dyn BettingProvider>],
        EngineOptions {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            preferred_provider: None,
        },
    );
    assert_ok!(engine.start(creds()).await);

    let outcome = tokio::time::timeout(Duration::from_secs(600), engine.execute(&red(dec!(10))))
        .await
        .expect("execute must finish once every attempt has timed out");
    assert!(matches!(outcome, Err(EngineError::Exhausted { attempts: 3, .. })));
    assert!(engine.stop().await.is_some());
}

#[tokio::test]
async fn test_reply_from_live_context_resolves_waiter() {
    let (provider, mut seen) = rogue(OnBet::Stall, SandboxSettings::default());
    let provider = Arc::new(provider);
    assert_ok!(provider.connect(&creds()).await);

    let p = Arc::clone(&provider);
    let pending = tokio::spawn(async move { p.execute(&red(dec!(10))).await });
    let request_id = seen.recv().await.unwrap();

    let origin = provider.context_id().unwrap();
    provider
        .window()
        .unwrap()
        .send(Envelope {
            origin,
            body: forged_win(request_id).encode().unwrap(),
        })
        .await
        .unwrap();

    let result = pending.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.bet_id.as_deref(), Some("FORGED"));
    assert_eq!(result.winning_category.as_deref(), Some("red"));
}

#[tokio::test]
async fn test_context_death_fails_over_to_next_provider() {
    let (sandbox, _seen) = rogue(OnBet::Crash, SandboxSettings::default());
    let backup = Arc::new(StubProvider::new("backup", 2));
    let providers: Vec<Arc<dyn BettingProvider>> = vec![
        Arc::new(sandbox) as Arc<dyn BettingProvider>,
        backup.clone() as Arc<dyn BettingProvider>,
    ];
    let manager = manager(
        providers,
        AutomationConfig {
            retry_attempts: 2,
            retry_delay_ms: 1,
            ..AutomationConfig::default()
        },
    );
    let mut rx = manager.subscribe();

    assert_ok!(manager.start(creds()).await);
    assert_eq!(manager.current_provider().as_deref(), Some("sandbox"));

    let result = assert_ok!(manager.place_bet(red(dec!(10))).await);
    assert!(result.success);
    assert_eq!(manager.current_provider().as_deref(), Some("backup"));
    assert_eq!(backup.execute_calls(), 1);

    let names = notification_names(&mut rx);
    assert!(names.contains(&"provider_disconnected"));
    assert!(names.contains(&"provider_switched"));
    assert!(names.contains(&"bet_failed"));
}

#[tokio::test]
async fn test_seeded_tables_are_reproducible() {
    let factory = |seed: u64| -> ProgramFactory {
        Arc::new(move |_: &Credentials| {
            Box::new(TableProgram::new(RouletteTable::seeded(dec!(1000), seed)))
                as Box<dyn SandboxProgram>
        })
    };
    let a = SandboxProvider::new("a", 1, SandboxSettings::default(), factory(7));
    let b = SandboxProvider::new("b", 1, SandboxSettings::default(), factory(7));
    assert_ok!(a.connect(&creds()).await);
    assert_ok!(b.connect(&creds()).await);

    for _ in 0..5 {
        let ra = a.execute(&red(dec!(1))).await.unwrap();
        let rb = b.execute(&red(dec!(1))).await.unwrap();
        assert_eq!(ra.winning_value, rb.winning_value);
        assert_eq!(ra.profit, rb.profit);
    }
}
