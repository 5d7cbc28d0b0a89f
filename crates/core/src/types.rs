/// Audit jobs are identified by an opaque server-assigned string.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
