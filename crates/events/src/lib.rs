//! Unified in-app notification feed.
//!
//! This crate merges audit events from polling and from the push channel
//! into one ordered, bounded, read-tracked log:
//!
//! - [`Notification`] / [`NewNotification`]: the feed entry and its builder.
//! - [`NotificationCenter`]: the feed itself, with auto-expiry of
//!   non-error entries and a [`FeedChange`] broadcast for subscribers.

pub mod center;
pub mod notification;

pub use center::{FeedChange, NotificationCenter};
pub use notification::{NewNotification, Notification, NotificationKind};
