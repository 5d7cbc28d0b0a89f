//! Ordered, bounded notification feed with read tracking.
//!
//! [`NotificationCenter`] is the single sink for notifications coming from
//! the poller callbacks and from push-channel listeners. It is a cheap
//! clone handle, designed to be shared across the application.
//!
//! Every mutation is published as a [`FeedChange`] on a
//! `tokio::sync::broadcast` channel; call [`NotificationCenter::subscribe`]
//! and drop the receiver to unsubscribe.
//!
//! The center does not de-duplicate terminal notifications for a job.
//! Producers must make sure a poller's completion is delivered once and
//! must not re-add an equivalent push completion for the same job.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use auditwatch_core::connection::ConnectionState;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::notification::{NewNotification, Notification, NotificationKind};

/// Delay after which non-error notifications remove themselves.
pub const AUTO_DISMISS_AFTER: Duration = Duration::from_millis(5000);

/// Upper bound on the number of entries kept in the feed.
pub const MAX_NOTIFICATIONS: usize = 100;

/// Buffer capacity of the change broadcast channel.
const FEED_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// FeedChange
// ---------------------------------------------------------------------------

/// A mutation of the feed, as seen by subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum FeedChange {
    Added(Notification),
    Removed { id: String },
    Read { id: String },
    AllRead,
    Cleared,
    Connection { state: ConnectionState },
}

// ---------------------------------------------------------------------------
// NotificationCenter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct NotificationCenter {
    shared: Arc<Shared>,
}

struct Shared {
    feed: Mutex<Feed>,
    changes: broadcast::Sender<FeedChange>,
    auto_dismiss: Duration,
    capacity: usize,
}

#[derive(Default)]
struct Feed {
    entries: VecDeque<Notification>,
    unread: usize,
    connection: ConnectionState,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_limits(AUTO_DISMISS_AFTER, MAX_NOTIFICATIONS)
    }

    /// Create a center with a custom auto-dismiss delay and capacity.
    pub fn with_limits(auto_dismiss: Duration, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                feed: Mutex::new(Feed::default()),
                changes,
                auto_dismiss,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe to every subsequent feed mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedChange> {
        self.shared.changes.subscribe()
    }

    /// Append a notification and return its generated id.
    ///
    /// Non-error entries arm a timer that removes them after the
    /// auto-dismiss delay. Arming requires a tokio runtime; without one the
    /// entry simply persists.
    pub fn add(&self, new: NewNotification) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let notification = new.into_notification(id.clone(), chrono::Utc::now());
        let kind = notification.kind;

        let evicted = {
            let mut feed = self.feed();
            let mut evicted = Vec::new();
            while feed.entries.len() >= self.shared.capacity {
                let Some(oldest) = feed.entries.pop_front() else { break };
                if !oldest.read {
                    feed.unread -= 1;
                }
                evicted.push(oldest.id);
            }
            feed.entries.push_back(notification.clone());
            feed.unread += 1;
            evicted
        };

        for evicted_id in evicted {
            tracing::debug!(id = %evicted_id, "Evicted oldest notification");
            self.publish(FeedChange::Removed { id: evicted_id });
        }

        tracing::debug!(
            id = %id,
            kind = ?kind,
            job_id = notification.job_id.as_deref(),
            "Notification added",
        );
        self.publish(FeedChange::Added(notification));

        if kind.auto_dismisses() {
            self.arm_auto_dismiss(id.clone());
        }

        id
    }

    /// Remove a notification. Returns `false` for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut feed = self.feed();
            match feed.entries.iter().position(|n| n.id == id) {
                Some(index) => {
                    let removed = feed.entries.remove(index);
                    if removed.as_ref().is_some_and(|n| !n.read) {
                        feed.unread -= 1;
                    }
                    removed.is_some()
                }
                None => false,
            }
        };

        if removed {
            self.publish(FeedChange::Removed { id: id.to_string() });
        }
        removed
    }

    /// Mark one notification as read. Returns `false` for unknown ids;
    /// marking an already-read entry is a no-op that returns `true`.
    pub fn mark_read(&self, id: &str) -> bool {
        let changed = {
            let mut feed = self.feed();
            let Some(entry) = feed.entries.iter_mut().find(|n| n.id == id) else {
                return false;
            };
            let changed = !entry.read;
            entry.read = true;
            if changed {
                feed.unread -= 1;
            }
            changed
        };

        if changed {
            self.publish(FeedChange::Read { id: id.to_string() });
        }
        true
    }

    pub fn mark_all_read(&self) {
        {
            let mut feed = self.feed();
            feed.entries.iter_mut().for_each(|n| n.read = true);
            feed.unread = 0;
        }
        self.publish(FeedChange::AllRead);
    }

    /// Remove every notification, including persistent errors.
    pub fn clear(&self) {
        {
            let mut feed = self.feed();
            feed.entries.clear();
            feed.unread = 0;
        }
        self.publish(FeedChange::Cleared);
    }

    /// All notifications, oldest first.
    pub fn list(&self) -> Vec<Notification> {
        self.feed().entries.iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.feed().entries.iter().find(|n| n.id == id).cloned()
    }

    pub fn by_type(&self, kind: NotificationKind) -> Vec<Notification> {
        self.filtered(|n| n.kind == kind)
    }

    pub fn by_job(&self, job_id: &str) -> Vec<Notification> {
        self.filtered(|n| n.job_id.as_deref() == Some(job_id))
    }

    /// Number of unread notifications.
    pub fn unread(&self) -> usize {
        self.feed().unread
    }

    /// The unread notifications themselves, oldest first.
    pub fn unread_notifications(&self) -> Vec<Notification> {
        self.filtered(|n| !n.read)
    }

    pub fn len(&self) -> usize {
        self.feed().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed().entries.is_empty()
    }

    /// Record the push channel's latest state for feed consumers.
    pub fn set_connection_state(&self, state: ConnectionState) {
        {
            let mut feed = self.feed();
            if feed.connection == state {
                return;
            }
            feed.connection = state;
        }
        self.publish(FeedChange::Connection { state });
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.feed().connection
    }

    // ---- private helpers ----

    fn filtered(&self, keep: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        self.feed().entries.iter().filter(|n| keep(n)).cloned().collect()
    }

    fn feed(&self) -> MutexGuard<'_, Feed> {
        self.shared.feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, change: FeedChange) {
        // A SendError only means there are no subscribers.
        let _ = self.shared.changes.send(change);
    }

    /// Spawn the expiry timer. Holds only a weak reference so a dropped
    /// center is not kept alive by pending timers.
    fn arm_auto_dismiss(&self, id: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(id = %id, "No tokio runtime, notification will not auto-dismiss");
            return;
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let expiry = tokio::time::sleep(self.shared.auto_dismiss);
        runtime.spawn(async move {
            expiry.await;
            if let Some(shared) = weak.upgrade() {
                let center = NotificationCenter { shared };
                if center.remove(&id) {
                    tracing::trace!(id = %id, "Notification auto-dismissed");
                }
            }
        });
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
