pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;

use crate::{Entry, EntryId, OutboxResult, StatusCounts};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Store trait for outbox persistence primitives.
///
/// Every operation except `init` fails with `OutboxError::NotInitialized`
/// until `init` has completed once. Operations are serializable at the
/// granularity of a single entry; callers may interleave operations on
/// different entries.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Create the schema if missing. Idempotent.
    async fn init(&self) -> OutboxResult<()>;

    /// Upsert by id: re-inserting the same id replaces the record in place.
    async fn insert(&self, entry: Entry) -> OutboxResult<()>;

    /// Replace by id; no-op if the id is absent.
    async fn update(&self, entry: Entry) -> OutboxResult<()>;

    /// Transition to `done` and clear the error.
    async fn mark_done(&self, id: &EntryId) -> OutboxResult<()>;

    /// With `next_attempt`: back to `queued` with that schedule and the
    /// error recorded (the soft-retry path). Without: terminal `failed`.
    async fn mark_failed(
        &self,
        id: &EntryId,
        error: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> OutboxResult<()>;

    /// Fetch a single entry by id (diagnostics and tests)
    async fn get(&self, id: &EntryId) -> OutboxResult<Option<Entry>>;

    /// Read-only: up to `limit` ready entries (status `queued`,
    /// `next_attempt_at` null or `<= now`), ordered by priority
    /// descending then `created_at` ascending. Claiming is the caller's
    /// job, via `update` with status `processing`.
    async fn pick_for_processing(&self, limit: usize, now: DateTime<Utc>)
        -> OutboxResult<Vec<Entry>>;

    /// Force `processing` entries last touched before `cutoff` back to
    /// `queued`, incrementing `attempt` and recording a lock-timeout
    /// error. Returns how many were reclaimed.
    async fn reclaim_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>)
        -> OutboxResult<u64>;

    /// Delete all entries, or only those in the given channel.
    async fn clear(&self, channel: Option<&str>) -> OutboxResult<()>;

    /// Per-status counts, optionally filtered by channel.
    async fn status_counts(&self, channel: Option<&str>) -> OutboxResult<StatusCounts>;

    /// Lazy, restartable stream of queued-entry counts. First emission is
    /// the current count, then one per store mutation; consecutive
    /// duplicates are suppressed.
    fn watch_count(&self, channel: Option<String>) -> BoxStream<u64>;

    /// Same signal discipline as `watch_count`, emitting full per-status
    /// counts. Feeds `Outbox::watch`.
    fn watch_status(&self) -> BoxStream<StatusCounts>;

    /// Release held resources. Further operations fail `NotInitialized`.
    async fn close(&self) -> OutboxResult<()>;
}
