//! Push-channel message types and parser.
//!
//! Every WebSocket text frame has the shape `{"event": "<name>", "data":
//! {...}}`. Audit events arrive through two paths carrying the same
//! payloads:
//!
//! - named events: `audit_progress`, `audit_completion`, `system_alert`,
//!   `metrics_update`;
//! - the generic `notification` envelope, whose `data` is
//!   `{type, data, timestamp, audit_id?}` with `type` set to one of the
//!   four names above.
//!
//! Both parse into the same [`ChannelEvent`], so listeners cannot tell
//! (and need not care) which path delivered it.

use auditwatch_core::job_events::{
    EVENT_AUDIT_COMPLETION, EVENT_AUDIT_PROGRESS, EVENT_METRICS_UPDATE, EVENT_NOTIFICATION,
    EVENT_SYSTEM_ALERT,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A logical push event, independent of the delivery path.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    AuditProgress(ProgressData),
    AuditCompletion(CompletionData),
    SystemAlert(AlertData),
    MetricsUpdate(MetricsData),
}

/// Payload for `audit_progress`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Present when the server addresses the audit explicitly; room-scoped
    /// deliveries may omit it.
    #[serde(default)]
    pub audit_id: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub progress: i64,
}

/// Payload for `audit_completion`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionData {
    #[serde(default)]
    pub audit_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

/// Payload for `system_alert`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertData {
    pub level: String,
    pub message: String,
}

/// Payload for `metrics_update`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricsData {
    #[serde(default)]
    pub alert: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Raw frame as sent on the wire.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Data of the generic `notification` envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    audit_id: Option<String>,
}

/// Outbound frame.
#[derive(Debug, Serialize)]
struct OutgoingFrame<'a> {
    event: &'a str,
    data: &'a serde_json::Value,
}

/// Errors from [`parse_message`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

/// Parse a push-channel text frame into a typed event.
///
/// Returns `Err` for malformed JSON or unknown event names. Callers should
/// log and continue.
pub fn parse_message(text: &str) -> Result<ChannelEvent, ParseError> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.event == EVENT_NOTIFICATION {
        let envelope: Envelope = serde_json::from_value(frame.data)?;
        let data = with_audit_id(envelope.data, envelope.audit_id);
        return parse_event(&envelope.kind, data);
    }
    parse_event(&frame.event, frame.data)
}

/// Serialize an outbound `{event, data}` frame.
pub fn encode_message(event: &str, data: &serde_json::Value) -> String {
    serde_json::to_string(&OutgoingFrame { event, data })
        .unwrap_or_else(|_| format!(r#"{{"event":"{event}","data":null}}"#))
}

fn parse_event(name: &str, data: serde_json::Value) -> Result<ChannelEvent, ParseError> {
    match name {
        EVENT_AUDIT_PROGRESS => Ok(ChannelEvent::AuditProgress(decode(data)?)),
        EVENT_AUDIT_COMPLETION => Ok(ChannelEvent::AuditCompletion(decode(data)?)),
        EVENT_SYSTEM_ALERT => Ok(ChannelEvent::SystemAlert(decode(data)?)),
        EVENT_METRICS_UPDATE => Ok(ChannelEvent::MetricsUpdate(decode(data)?)),
        other => Err(ParseError::UnknownEvent(other.to_string())),
    }
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, ParseError> {
    Ok(serde_json::from_value(data)?)
}

/// Copy the envelope's `audit_id` into the inner payload unless the payload
/// already names one.
fn with_audit_id(mut data: serde_json::Value, audit_id: Option<String>) -> serde_json::Value {
    if let (Some(id), Some(object)) = (audit_id, data.as_object_mut()) {
        object
            .entry("audit_id")
            .or_insert(serde_json::Value::String(id));
    }
    data
}
