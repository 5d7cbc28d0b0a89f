//! Notification feed entries.
//!
//! A [`NewNotification`] is what producers hand to
//! [`NotificationCenter::add`](crate::NotificationCenter::add); the center
//! assigns the id and timestamp and stores a [`Notification`].

use auditwatch_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};

/// Visual/semantic category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    Progress,
}

impl NotificationKind {
    /// Error notifications stay until the user dismisses them.
    pub fn auto_dismisses(self) -> bool {
        self != Self::Error
    }
}

/// A stored feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: Timestamp,
    pub read: bool,
    /// Only present for [`NotificationKind::Progress`].
    pub progress: Option<u8>,
    /// Audit this entry correlates with, if any.
    pub job_id: Option<JobId>,
}

// ---------------------------------------------------------------------------
// NewNotification
// ---------------------------------------------------------------------------

/// Input for [`NotificationCenter::add`](crate::NotificationCenter::add).
///
/// Constructed via [`NewNotification::new`] or the per-kind shorthands and
/// enriched with [`with_job`](NewNotification::with_job) and
/// [`with_progress`](NewNotification::with_progress).
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub progress: Option<u8>,
    pub job_id: Option<JobId>,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            progress: None,
            job_id: None,
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    /// Progress notification; the value is clamped to 0-100.
    pub fn progress(title: impl Into<String>, message: impl Into<String>, progress: i64) -> Self {
        Self::new(NotificationKind::Progress, title, message).with_progress(progress)
    }

    pub fn with_job(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(auditwatch_core::job::clamp_progress(progress));
        self
    }

    /// Materialize into a stored entry. `progress` is dropped for kinds
    /// other than [`NotificationKind::Progress`].
    pub(crate) fn into_notification(self, id: String, timestamp: Timestamp) -> Notification {
        let progress = match self.kind {
            NotificationKind::Progress => self.progress,
            _ => None,
        };
        Notification {
            id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            timestamp,
            read: false,
            progress,
            job_id: self.job_id,
        }
    }
}
