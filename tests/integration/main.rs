//! Integration tests for the wager execution core.
//!
//! Exercise the public API end to end: the engine's failover against
//! stub providers, the manager's risk governance, the sandbox boundary
//! and the WebDriver adapter against a local mock server.

mod helpers;

mod driver_webdriver;
mod engine_failover;
mod manager_risk;
mod sandbox_protocol;
