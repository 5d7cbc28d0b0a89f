//! REST client for the audit status endpoint.
//!
//! Wraps `GET /audit/status/{audit_id}` using [`reqwest`] and maps the
//! response into a [`Job`] snapshot.

use async_trait::async_trait;
use auditwatch_core::job::{clamp_progress, Job, JobStatus};
use auditwatch_core::types::Timestamp;
use serde::Deserialize;

use crate::source::{FetchError, StatusSource};

/// HTTP client for the audit API.
pub struct AuditStatusApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body returned by `GET /audit/status/{audit_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub audit_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<i64>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    /// Convert into a snapshot. Unknown status strings are a decode error.
    pub fn into_job(self) -> Result<Job, FetchError> {
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e: auditwatch_core::error::CoreError| FetchError::Decode(e.to_string()))?;

        Ok(Job {
            id: self.audit_id,
            status,
            progress: clamp_progress(self.progress.unwrap_or(0)),
            current_step: self.current_step,
            created_at: self.start_time.unwrap_or_else(chrono::Utc::now),
            error_message: self.error,
        })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl AuditStatusApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// URL polled for a given audit.
    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}/audit/status/{}", self.api_url, job_id)
    }

    /// Fetch the raw status document for an audit.
    pub async fn get_status(&self, job_id: &str) -> Result<StatusResponse, FetchError> {
        let response = self.client.get(self.status_url(job_id)).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<StatusResponse>().await?)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise return
    /// [`FetchError::Http`] with the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StatusSource for AuditStatusApi {
    async fn fetch_status(&self, job_id: &str) -> Result<Job, FetchError> {
        let mut job = self.get_status(job_id).await?.into_job()?;
        if job.id != job_id {
            tracing::warn!(job_id, reported = %job.id, "Status response for a different audit id");
            job.id = job_id.to_string();
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_full_status_response() {
        let json = r#"{"audit_id":"a1","status":"in_progress","progress":35,"current_step":"Crawling pages","start_time":"2026-01-02T03:04:05Z"}"#;
        let job = serde_json::from_str::<StatusResponse>(json)
            .unwrap()
            .into_job()
            .unwrap();
        assert_eq!(job.id, "a1");
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.progress, 35);
        assert_eq!(job.current_step.as_deref(), Some("Crawling pages"));
        assert_eq!(job.created_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(job.error_message.is_none());
    }

    #[test]
    fn parse_failed_status_with_error() {
        let json = r#"{"audit_id":"a1","status":"failed","progress":60,"error":"crawler crashed"}"#;
        let job = serde_json::from_str::<StatusResponse>(json)
            .unwrap()
            .into_job()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("crawler crashed"));
    }

    #[test]
    fn unknown_status_is_decode_error() {
        let json = r#"{"audit_id":"a1","status":"exploded"}"#;
        let result = serde_json::from_str::<StatusResponse>(json)
            .unwrap()
            .into_job();
        assert_matches!(result, Err(FetchError::Decode(_)));
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let json = r#"{"audit_id":"a1","status":"running","progress":250}"#;
        let job = serde_json::from_str::<StatusResponse>(json)
            .unwrap()
            .into_job()
            .unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn status_url_strips_trailing_slash() {
        let api = AuditStatusApi::new("http://localhost:8000/api/");
        assert_eq!(api.status_url("a1"), "http://localhost:8000/api/audit/status/a1");
    }
}
