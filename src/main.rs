//! CROUPIER: Resilient wager execution core
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens a session on the first provider that connects, then places one
//! wager per JSON line read from stdin until EOF or Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use croupier::config::{self, ProvidersConfig};
use croupier::engine::EngineState;
use croupier::events::NotificationReceiver;
use croupier::manager::{AutomationManager, ProviderFactory};
use croupier::providers::{build_providers, BettingProvider};
use croupier::types::ActionRequest;

const BANNER: &str = r#"
  ____ ____   ___  _   _ ____ ___ _____ ____
 / ___|  _ \ / _ \| | | |  _ \_ _| ____|  _ \
| |   | |_) | | | | | | | |_) | ||  _| | |_) |
| |___|  _ <| |_| | |_| |  __/| || |___|  _ <
 \____|_| \_\\___/ \___/|_|  |___|_____|_| \_\

  Resilient wager execution core
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::var("CROUPIER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&path)?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        config = %path,
        sandbox = cfg.providers.sandbox.enabled,
        driver = cfg.providers.driver.enabled,
        max_bet = %cfg.automation.max_bet_amount,
        max_loss = %cfg.automation.max_loss_per_session,
        "CROUPIER starting up"
    );

    let credentials = cfg
        .credentials
        .resolve()
        .context("Failed to resolve account credentials")?;

    let providers_cfg: ProvidersConfig = cfg.providers.clone();
    let factory: Arc<dyn ProviderFactory> =
        Arc::new(move || -> Vec<Arc<dyn BettingProvider>> { build_providers(&providers_cfg) });

    let manager = AutomationManager::new(cfg.automation.clone(), factory)
        .context("Invalid automation config")?;

    for option in manager.provider_options() {
        info!(
            provider = %option.name,
            priority = option.priority,
            available = option.available,
            recommended = option.recommended,
            "Provider registered"
        );
    }

    let notifier = tokio::spawn(log_notifications(manager.subscribe()));

    manager
        .start(credentials)
        .await
        .context("No provider could be connected")?;
    info!(provider = ?manager.current_provider(), "Session open. Send one JSON request per line; Ctrl+C to stop.");

    // -- Main loop -------------------------------------------------------

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed.");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let request: ActionRequest = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed request");
                        continue;
                    }
                };

                match manager.place_bet(request).await {
                    Ok(result) => {
                        info!(%result, "Wager processed");
                        println!("{}", serde_json::to_string(&result)?);
                    }
                    Err(e) => error!(error = %e, "Wager not placed"),
                }

                let state = manager.detailed_status().state;
                if state != EngineState::Running {
                    info!(%state, "Session no longer running.");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let session = manager.stop().await.or_else(|| manager.current_session());
    let metrics = manager.metrics();
    info!(
        session = ?session.as_ref().map(|s| s.id.as_str()),
        actions = metrics.sessions_today,
        profit = format!("${:.2}", manager.session_profit()),
        win_rate = format!("{:.1}%", metrics.win_rate),
        error_rate = format!("{:.1}%", metrics.error_rate),
        avg_ms = format!("{:.0}", metrics.average_action_time),
        "CROUPIER shut down cleanly."
    );

    drop(manager);
    let _ = notifier.await;
    Ok(())
}

/// Stream public notifications into the log until the bus closes.
async fn log_notifications(mut rx: NotificationReceiver) {
    while let Some(item) = rx.recv().await {
        match item {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(json) => info!(event = n.name(), payload = %json, "Notification"),
                Err(e) => warn!(event = n.name(), error = %e, "Unserializable notification"),
            },
            Err(lag) => warn!("{lag}"),
        }
    }
}

/// Initialise the `tracing` subscriber.
///
/// `RUST_LOG` wins; otherwise the configured log level applies to this
/// crate. Set `CROUPIER_LOG_JSON` for JSON output.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("croupier={}", cfg.automation.log_level)));

    let json_logging = std::env::var("CROUPIER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
