//! # postbox: Durable Outbox Infrastructure
//!
//! A persistent, offline-tolerant queue that accepts application events and
//! delivers them to an external endpoint: at-least-once transport, idempotent
//! de-duplication, priority ordering, and decorrelated-jitter retry backoff.
//!
//! Three cooperating subsystems:
//!
//! - **Entry store** ([`OutboxStore`]): a persistent table of queued work with
//!   priority, retry scheduling, and status. SQLite-backed
//!   ([`SqliteStore`]) for durability, in-memory ([`MemoryStore`]) for tests.
//! - **Scheduler runtime**: a cooperative loop that claims ready entries,
//!   dispatches them through a transport, and settles their fate
//!   (done / retry / permanent failure), bounded by a concurrency gate.
//! - **Retry policy** ([`RetryPolicy`]): decorrelated jitter drawing each
//!   delay from `[base, min(cap, prev * 3)]`.
//!
//! ## Quick start
//!
//! ```no_run
//! use postbox::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> postbox::OutboxResult<()> {
//! let store = Arc::new(SqliteStore::new("outbox.db"));
//! let transport = Arc::new(HttpTransport::new(
//!     HttpTransportConfig::new("https://api.example.com/events"),
//! )?);
//!
//! let outbox = Outbox::new(store, transport);
//! outbox.init().await?;
//!
//! outbox
//!     .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-1"})))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The scheduler starts on `init` by default (`auto_start`) and is kicked on
//! every enqueue; entries survive process restarts and are retried until they
//! succeed, fail permanently, or exhaust their attempt budget.

pub mod config;
pub mod error;
pub mod observability;
pub mod outbox;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod types;

pub use config::OutboxConfig;
pub use error::{OutboxError, OutboxResult};
pub use observability::{LiveMetrics, MetricsSink, NoopMetrics};
pub use outbox::Outbox;
pub use policy::{classify_status, HttpRetryClass, RetryPolicy};
pub use scheduler::Scheduler;
pub use store::{BoxStream, MemoryStore, OutboxStore, SqliteStore};
pub use transport::{HttpTransport, HttpTransportConfig, OutboxTransport, SendResult};
pub use types::{EnqueueRequest, Entry, EntryId, EntryStatus, OutboxState, StatusCounts};

/// Common imports for outbox users
pub mod prelude {
    pub use crate::{
        EnqueueRequest, Entry, EntryId, EntryStatus, HttpTransport, HttpTransportConfig,
        MemoryStore, Outbox, OutboxConfig, OutboxResult, OutboxState, OutboxStore,
        OutboxTransport, RetryPolicy, SendResult, SqliteStore,
    };

    pub use async_trait::async_trait;
}
