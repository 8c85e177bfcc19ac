/// Instance ids are human-readable strings such as `gpt2-8000`.
pub type InstanceId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque key/value configuration passed through to an inference backend.
pub type Parameters = serde_json::Map<String, serde_json::Value>;
