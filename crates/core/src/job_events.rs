//! Push-channel event name constants for audit lifecycle updates.
//!
//! Shared by the realtime channel (parsing and emitting) and the wiring
//! layer. Must match the names the server emits.

/// Client -> server: subscribe to one audit's room.
pub const EVENT_JOIN_AUDIT: &str = "join_audit";

/// Client -> server: leave one audit's room.
pub const EVENT_LEAVE_AUDIT: &str = "leave_audit";

/// Step/percentage update for a running audit.
pub const EVENT_AUDIT_PROGRESS: &str = "audit_progress";

/// Audit reached a final status.
pub const EVENT_AUDIT_COMPLETION: &str = "audit_completion";

/// Operator-level alert broadcast to every client.
pub const EVENT_SYSTEM_ALERT: &str = "system_alert";

/// Periodic metrics push, optionally carrying an alert.
pub const EVENT_METRICS_UPDATE: &str = "metrics_update";

/// Generic envelope carrying any of the four logical events above.
pub const EVENT_NOTIFICATION: &str = "notification";
