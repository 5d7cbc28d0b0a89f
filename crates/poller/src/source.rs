//! The status-fetch seam used by the poller.

use std::time::Duration;

use async_trait::async_trait;
use auditwatch_core::job::Job;

/// Fetches the current snapshot of one audit.
///
/// Implemented over HTTP by [`AuditStatusApi`](crate::api::AuditStatusApi);
/// tests provide scripted fakes.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<Job, FetchError>;
}

/// How a failed fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429 or 5xx: retry with exponentially growing delay.
    Backoff,
    /// Network failure, malformed body, other HTTP status: retry at the base
    /// interval.
    Other,
}

/// Errors from a single status fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The request never produced a response (connect, DNS, TLS, reset).
    #[error("HTTP request failed: {0}")]
    Network(String),

    /// The server answered with a non-2xx status code.
    #[error("Audit API error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body was not a valid status document.
    #[error("Malformed status response: {0}")]
    Decode(String),

    /// The request exceeded the configured per-request timeout.
    #[error("Status request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http { status, .. } if *status == 429 || *status >= 500 => FailureClass::Backoff,
            _ => FailureClass::Other,
        }
    }
}
