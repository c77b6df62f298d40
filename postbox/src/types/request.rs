use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Enqueue submission data, built before the facade stamps identity and
/// timestamps onto it.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    /// Target channel
    pub channel: String,

    /// JSON payload delivered to the transport
    pub payload: Value,

    /// Optional headers passed to the transport as-is
    pub headers: Option<HashMap<String, String>>,

    /// Optional dedup hint (1..=256 chars)
    pub idempotency_key: Option<String>,

    /// Higher wins; may be negative
    pub priority: i32,

    /// Earliest delivery time
    pub not_before: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    /// Create a new enqueue request for a channel
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            headers: None,
            idempotency_key: None,
            priority: 0,
            not_before: None,
        }
    }

    /// Set transport headers
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Set the idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay delivery until the given time
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}
