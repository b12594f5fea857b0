//! WebDriver adapter against an in-process mock driver.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use croupier::error::ProviderError;
use croupier::events::ProviderEvent;
use croupier::providers::driver::{DriverProvider, DriverSettings};
use croupier::providers::BettingProvider;

use crate::helpers::{creds, red};

#[derive(Default)]
struct MockDriver {
    reject_login: AtomicBool,
    expire_session: AtomicBool,
    calls: Mutex<Vec<String>>,
    last_bet: Mutex<Option<Value>>,
}

type Shared = Arc<MockDriver>;

fn ok(value: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "value": value })))
}

async fn new_session(State(mock): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let browser = body["capabilities"]["alwaysMatch"]["browserName"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    mock.calls.lock().push(format!("new_session:{browser}"));
    ok(json!({ "sessionId": "wd-1", "capabilities": {} }))
}

async fn timeouts(State(mock): State<Shared>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    mock.calls.lock().push(format!("timeouts:{id}"));
    ok(Value::Null)
}

async fn navigate(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let url = body["url"].as_str().unwrap_or_default().to_string();
    mock.calls.lock().push(format!("url:{id}:{url}"));
    ok(Value::Null)
}

async fn execute_async(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let script = body["script"].as_str().unwrap_or_default();
    let arg = body["args"][0].clone();

    if script.contains("placeBet") {
        mock.calls.lock().push(format!("bet:{id}"));
        if mock.expire_session.load(Ordering::SeqCst) {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "value": {
                    "error": "invalid session id",
                    "message": "session deleted because of page crash",
                    "stacktrace": ""
                }})),
            );
        }
        *mock.last_bet.lock() = Some(arg);
        return ok(json!({
            "ok": true,
            "data": {
                "betId": "WD-1",
                "winningNumber": 7,
                "winningColor": "red",
                "payout": 20.0,
                "profit": 10.0
            }
        }));
    }

    mock.calls.lock().push(format!("login:{id}"));
    if mock.reject_login.load(Ordering::SeqCst) || arg["password"] != "hunter2" {
        return ok(json!({ "ok": false, "error": "bad password" }));
    }
    ok(json!({ "ok": true, "data": { "balance": 250.0 } }))
}

async fn delete_session(State(mock): State<Shared>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    mock.calls.lock().push(format!("delete:{id}"));
    ok(Value::Null)
}

async fn spawn_mock() -> (Shared, String) {
    let mock: Shared = Arc::new(MockDriver::default());
    let app = Router::new()
        .route("/session", post(new_session))
        .route("/session/:id", delete(delete_session))
        .route("/session/:id/timeouts", post(timeouts))
        .route("/session/:id/url", post(navigate))
        .route("/session/:id/execute/async", post(execute_async))
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://{addr}"))
}

fn driver(url: String) -> DriverProvider {
    let settings = DriverSettings {
        webdriver_url: url,
        command_timeout: Duration::from_secs(5),
        script_timeout: Duration::from_secs(5),
        ..DriverSettings::default()
    };
    DriverProvider::new("driver", 2, settings).unwrap()
}

#[tokio::test]
async fn test_connect_bet_disconnect_sequence() {
    let (mock, url) = spawn_mock().await;
    let driver = driver(url);

    assert_ok!(driver.connect(&creds()).await);
    assert!(driver.is_connected());
    assert_eq!(driver.session_id().as_deref(), Some("wd-1"));

    let result = assert_ok!(driver.execute(&red(dec!(10))).await);
    assert!(result.success);
    assert_eq!(result.bet_id.as_deref(), Some("WD-1"));
    assert_eq!(result.winning_value.as_deref(), Some("7"));
    assert_eq!(result.profit, Some(dec!(10)));

    let bet = mock.last_bet.lock().clone().unwrap();
    assert_eq!(bet["tableId"], "table-1");
    assert_eq!(bet["selections"][0]["type"], "color");

    driver.disconnect().await;
    assert!(!driver.is_connected());
    assert!(driver.session_id().is_none());

    assert_eq!(
        *mock.calls.lock(),
        vec![
            "new_session:chrome".to_string(),
            "timeouts:wd-1".to_string(),
            "url:wd-1:https://casino.example/lobby".to_string(),
            "login:wd-1".to_string(),
            "bet:wd-1".to_string(),
            "delete:wd-1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_rejected_login_cleans_up_session() {
    let (mock, url) = spawn_mock().await;
    mock.reject_login.store(true, Ordering::SeqCst);
    let driver = driver(url);

    let err = assert_err!(driver.connect(&creds()).await);
    assert_eq!(err, ProviderError::LoginRejected("bad password".into()));
    assert!(!driver.is_connected());
    assert!(driver.session_id().is_none());
    assert_eq!(mock.calls.lock().last().map(String::as_str), Some("delete:wd-1"));
    assert_eq!(driver.status().last_error.as_deref(), Some("login rejected: bad password"));
}

#[tokio::test]
async fn test_invalid_session_reports_disconnect() {
    let (mock, url) = spawn_mock().await;
    let driver = driver(url);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    driver.add_listener(Arc::new(move |event: &ProviderEvent| {
        if let ProviderEvent::Disconnected { reason, .. } = event {
            sink.lock().push(reason.clone());
        }
    }));

    assert_ok!(driver.connect(&creds()).await);
    mock.expire_session.store(true, Ordering::SeqCst);

    let err = assert_err!(driver.execute(&red(dec!(10))).await);
    assert_eq!(err, ProviderError::NotConnected("driver".into()));
    assert!(!driver.is_connected());
    assert!(driver.session_id().is_none());

    let reasons = events.lock().clone();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("page crash"));
}

#[tokio::test]
async fn test_unreachable_driver_fails_connect() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let driver = driver(format!("http://{addr}"));
    assert!(driver.is_available());
    let err = assert_err!(driver.connect(&creds()).await);
    assert!(matches!(err, ProviderError::Connection(_)));
    assert!(!driver.is_connected());
}
