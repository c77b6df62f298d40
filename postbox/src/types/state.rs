use serde::{Deserialize, Serialize};

/// Per-status entry counts observed from a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    /// Total entries currently held by the store
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.done + self.failed
    }
}

/// Live outbox state exposed by `Outbox::watch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxState {
    pub is_paused: bool,
    pub is_running: bool,
    pub queued_count: u64,
    pub processing_count: u64,
    /// Permanent failures only
    pub failed_count: u64,
}
