//! CROUPIER: Resilient wager execution core
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod error;
pub mod events;
pub mod types;
pub mod providers;
pub mod engine;
pub mod risk;
pub mod manager;
