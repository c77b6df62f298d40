use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::EntryId;

/// Entry status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Entry is waiting to be claimed (initial state, and the retry state)
    Queued,

    /// Entry is owned by exactly one worker
    Processing,

    /// Entry was delivered successfully
    Done,

    /// Entry failed permanently
    Failed,
}

impl EntryStatus {
    /// Check if the entry is in a terminal state (done or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parse a status from its stored name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An outbox entry: one unit of queued work.
///
/// Entries are plain values. Only the store mutates persisted state; the
/// scheduler builds replacement records with the copy-and-update
/// constructors below and writes them back through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry identifier (primary key)
    pub id: EntryId,

    /// Logical sub-queue, used for filtered queries
    pub channel: String,

    /// Arbitrary JSON payload, opaque to the core
    pub payload: Value,

    /// Optional headers passed to the transport as-is
    pub headers: Option<HashMap<String, String>>,

    /// Optional dedup hint carried to the transport
    pub idempotency_key: Option<String>,

    /// Higher wins; may be negative
    pub priority: i32,

    /// Incremented on every transient failure
    pub attempt: u32,

    /// Earliest eligible time; `None` means immediately
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Set once at enqueue
    pub created_at: DateTime<Utc>,

    /// Set on every state transition; drives the stuck-entry watchdog
    pub updated_at: DateTime<Utc>,

    /// Current status
    pub status: EntryStatus,

    /// Last error for diagnostics
    pub error: Option<String>,
}

impl Entry {
    /// Create a new queued entry
    pub fn new(id: EntryId, channel: String, payload: Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            channel,
            payload,
            headers: None,
            idempotency_key: None,
            priority: 0,
            attempt: 0,
            next_attempt_at: None,
            created_at,
            updated_at: created_at,
            status: EntryStatus::Queued,
            error: None,
        }
    }

    /// Check if the entry is claimable at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Queued
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Copy-and-update: claimed by a worker
    pub fn claimed(self, now: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Processing,
            updated_at: now,
            ..self
        }
    }

    /// Copy-and-update: delivered successfully
    pub fn done(self, now: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Done,
            error: None,
            updated_at: now,
            ..self
        }
    }

    /// Copy-and-update: failed permanently
    pub fn failed(self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Failed,
            error: Some(error.into()),
            updated_at: now,
            ..self
        }
    }

    /// Copy-and-update: transient failure, back to the queue with a schedule
    pub fn retried(
        self,
        next_attempt_at: DateTime<Utc>,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: EntryStatus::Queued,
            attempt: self.attempt + 1,
            next_attempt_at: Some(next_attempt_at),
            error: Some(error.into()),
            updated_at: now,
            ..self
        }
    }
}
