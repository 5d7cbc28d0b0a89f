//! Shared domain types for audit status tracking.
//!
//! Holds the [`Job`](job::Job) snapshot model, the process-wide
//! [`JobStore`](store::JobStore), the push-channel
//! [`ConnectionState`](connection::ConnectionState) and the wire-level
//! event name constants used by both transports.

pub mod connection;
pub mod error;
pub mod job;
pub mod job_events;
pub mod store;
pub mod types;
