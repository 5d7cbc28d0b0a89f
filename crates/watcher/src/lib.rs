//! `auditwatch` library crate.
//!
//! Wires the adaptive poller, the push channel and the notification feed
//! into one [`AuditWatch`](watch::AuditWatch). The binary entrypoint lives
//! in `main.rs`.

pub mod config;
pub mod ledger;
pub mod watch;

pub use config::{ConfigError, WatchConfig};
pub use watch::AuditWatch;
