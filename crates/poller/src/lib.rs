//! Adaptive status polling for long-running audits.
//!
//! Provides the [`StatusSource`](source::StatusSource) seam and its HTTP
//! implementation, backoff arithmetic, and the per-job
//! [`AdaptivePoller`](poller::AdaptivePoller) state machine.

pub mod api;
pub mod backoff;
pub mod poller;
pub mod source;

pub use api::AuditStatusApi;
pub use poller::{AdaptivePoller, PollerConfig, PollerHandlers, PollerState};
pub use source::{FailureClass, FetchError, StatusSource};
