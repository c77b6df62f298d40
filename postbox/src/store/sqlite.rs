use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::debug;

use super::{BoxStream, OutboxStore};
use crate::{Entry, EntryId, EntryStatus, OutboxError, OutboxResult, StatusCounts};

/// SQLite-backed store.
///
/// Every logical operation is a single statement, which preserves
/// single-entry atomicity. Reopening the same file recovers all entries
/// verbatim. Single-writer: at most one scheduler process per file.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    pool: Arc<RwLock<Option<SqlitePool>>>,
    changed: broadcast::Sender<()>,
}

impl SqliteStore {
    /// Create a store for the given database file (not yet opened).
    pub fn new(path: impl AsRef<Path>) -> Self {
        let (changed, _) = broadcast::channel(256);
        Self {
            path: path.as_ref().to_path_buf(),
            pool: Arc::new(RwLock::new(None)),
            changed,
        }
    }

    fn pool(&self) -> OutboxResult<SqlitePool> {
        self.pool
            .read()
            .clone()
            .ok_or(OutboxError::NotInitialized)
    }

    fn notify(&self) {
        let _ = self.changed.send(());
    }
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_entries (
    id              TEXT PRIMARY KEY,
    channel         TEXT NOT NULL,
    payload         TEXT NOT NULL,
    headers         TEXT,
    idempotency_key TEXT,
    priority        INTEGER NOT NULL DEFAULT 0,
    attempt         INTEGER NOT NULL DEFAULT 0,
    next_attempt_at INTEGER,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL,
    status          TEXT NOT NULL,
    error           TEXT
)
"#;

const CREATE_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_outbox_status_next
    ON outbox_entries (status, next_attempt_at)
"#;

const CREATE_CHANNEL_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_outbox_channel_priority
    ON outbox_entries (channel, priority DESC, next_attempt_at)
"#;

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn init(&self) -> OutboxResult<()> {
        if self.pool.read().is_some() {
            return Ok(());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_STATUS_INDEX).execute(&pool).await?;
        sqlx::query(CREATE_CHANNEL_INDEX).execute(&pool).await?;

        debug!(path = %self.path.display(), "opened outbox database");
        *self.pool.write() = Some(pool);
        Ok(())
    }

    async fn insert(&self, entry: Entry) -> OutboxResult<()> {
        let pool = self.pool()?;
        let headers_json = entry
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO outbox_entries (
                id, channel, payload, headers, idempotency_key,
                priority, attempt, next_attempt_at, created_at, updated_at,
                status, error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(entry.id.as_str())
        .bind(&entry.channel)
        .bind(entry.payload.to_string())
        .bind(headers_json)
        .bind(&entry.idempotency_key)
        .bind(entry.priority as i64)
        .bind(entry.attempt as i64)
        .bind(entry.next_attempt_at.map(|t| t.timestamp_millis()))
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.updated_at.timestamp_millis())
        .bind(entry.status.name())
        .bind(&entry.error)
        .execute(&pool)
        .await?;

        self.notify();
        Ok(())
    }

    async fn update(&self, entry: Entry) -> OutboxResult<()> {
        let pool = self.pool()?;
        let headers_json = entry
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET channel = ?2,
                payload = ?3,
                headers = ?4,
                idempotency_key = ?5,
                priority = ?6,
                attempt = ?7,
                next_attempt_at = ?8,
                created_at = ?9,
                updated_at = ?10,
                status = ?11,
                error = ?12
            WHERE id = ?1
            "#,
        )
        .bind(entry.id.as_str())
        .bind(&entry.channel)
        .bind(entry.payload.to_string())
        .bind(headers_json)
        .bind(&entry.idempotency_key)
        .bind(entry.priority as i64)
        .bind(entry.attempt as i64)
        .bind(entry.next_attempt_at.map(|t| t.timestamp_millis()))
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.updated_at.timestamp_millis())
        .bind(entry.status.name())
        .bind(&entry.error)
        .execute(&pool)
        .await?;

        if result.rows_affected() > 0 {
            self.notify();
        }
        Ok(())
    }

    async fn mark_done(&self, id: &EntryId) -> OutboxResult<()> {
        let pool = self.pool()?;
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'done', error = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&pool)
        .await?;

        if result.rows_affected() > 0 {
            self.notify();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &EntryId,
        error: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> OutboxResult<()> {
        let pool = self.pool()?;
        let now = Utc::now().timestamp_millis();

        let result = match next_attempt {
            // Soft retry: back to the queue with a schedule
            Some(at) => {
                sqlx::query(
                    r#"
                    UPDATE outbox_entries
                    SET status = 'queued',
                        attempt = attempt + 1,
                        next_attempt_at = ?2,
                        error = ?3,
                        updated_at = ?4
                    WHERE id = ?1
                    "#,
                )
                .bind(id.as_str())
                .bind(at.timestamp_millis())
                .bind(error)
                .bind(now)
                .execute(&pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE outbox_entries
                    SET status = 'failed', error = ?2, updated_at = ?3
                    WHERE id = ?1
                    "#,
                )
                .bind(id.as_str())
                .bind(error)
                .bind(now)
                .execute(&pool)
                .await?
            }
        };

        if result.rows_affected() > 0 {
            self.notify();
        }
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> OutboxResult<Option<Entry>> {
        let pool = self.pool()?;
        let row = sqlx::query(
            r#"
            SELECT id, channel, payload, headers, idempotency_key,
                   priority, attempt, next_attempt_at, created_at, updated_at,
                   status, error
            FROM outbox_entries
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    async fn pick_for_processing(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> OutboxResult<Vec<Entry>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            r#"
            SELECT id, channel, payload, headers, idempotency_key,
                   priority, attempt, next_attempt_at, created_at, updated_at,
                   status, error
            FROM outbox_entries
            WHERE status = 'queued'
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
            ORDER BY priority DESC, created_at ASC
            LIMIT ?2
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn reclaim_stuck(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OutboxResult<u64> {
        let pool = self.pool()?;
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'queued',
                attempt = attempt + 1,
                error = 'lock timeout',
                updated_at = ?2
            WHERE status = 'processing' AND updated_at < ?1
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            self.notify();
        }
        Ok(reclaimed)
    }

    async fn clear(&self, channel: Option<&str>) -> OutboxResult<()> {
        let pool = self.pool()?;
        match channel {
            Some(c) => {
                sqlx::query("DELETE FROM outbox_entries WHERE channel = ?1")
                    .bind(c)
                    .execute(&pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM outbox_entries")
                    .execute(&pool)
                    .await?;
            }
        }
        self.notify();
        Ok(())
    }

    async fn status_counts(&self, channel: Option<&str>) -> OutboxResult<StatusCounts> {
        let pool = self.pool()?;
        status_counts_in(&pool, channel).await
    }

    fn watch_count(&self, channel: Option<String>) -> BoxStream<u64> {
        let store = self.clone();
        let rx = self.changed.subscribe();
        let stream = stream::unfold(
            (rx, None::<u64>, false),
            move |(mut rx, mut last, mut primed)| {
                let store = store.clone();
                let channel = channel.clone();
                async move {
                    loop {
                        if primed {
                            match rx.recv().await {
                                Ok(()) => {}
                                Err(broadcast::error::RecvError::Lagged(_)) => {}
                                Err(broadcast::error::RecvError::Closed) => return None,
                            }
                        } else {
                            primed = true;
                        }
                        let pool = match store.pool() {
                            Ok(pool) => pool,
                            Err(_) => return None,
                        };
                        let count = match count_queued_in(&pool, channel.as_deref()).await {
                            Ok(count) => count,
                            Err(_) => return None,
                        };
                        if last != Some(count) {
                            last = Some(count);
                            return Some((count, (rx, last, primed)));
                        }
                    }
                }
            },
        );
        Box::pin(stream)
    }

    fn watch_status(&self) -> BoxStream<StatusCounts> {
        let store = self.clone();
        let rx = self.changed.subscribe();
        let stream = stream::unfold(
            (rx, None::<StatusCounts>, false),
            move |(mut rx, mut last, mut primed)| {
                let store = store.clone();
                async move {
                    loop {
                        if primed {
                            match rx.recv().await {
                                Ok(()) => {}
                                Err(broadcast::error::RecvError::Lagged(_)) => {}
                                Err(broadcast::error::RecvError::Closed) => return None,
                            }
                        } else {
                            primed = true;
                        }
                        let pool = match store.pool() {
                            Ok(pool) => pool,
                            Err(_) => return None,
                        };
                        let counts = match status_counts_in(&pool, None).await {
                            Ok(counts) => counts,
                            Err(_) => return None,
                        };
                        if last != Some(counts) {
                            last = Some(counts);
                            return Some((counts, (rx, last, primed)));
                        }
                    }
                }
            },
        );
        Box::pin(stream)
    }

    async fn close(&self) -> OutboxResult<()> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }
}

async fn count_queued_in(pool: &SqlitePool, channel: Option<&str>) -> OutboxResult<u64> {
    let row = match channel {
        Some(c) => {
            sqlx::query(
                "SELECT COUNT(*) AS n FROM outbox_entries WHERE status = 'queued' AND channel = ?1",
            )
            .bind(c)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT COUNT(*) AS n FROM outbox_entries WHERE status = 'queued'")
                .fetch_one(pool)
                .await?
        }
    };
    let n: i64 = row.try_get("n")?;
    Ok(n as u64)
}

async fn status_counts_in(pool: &SqlitePool, channel: Option<&str>) -> OutboxResult<StatusCounts> {
    let rows = match channel {
        Some(c) => {
            sqlx::query(
                r#"
                SELECT status, COUNT(*) AS n
                FROM outbox_entries
                WHERE channel = ?1
                GROUP BY status
                "#,
            )
            .bind(c)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_entries GROUP BY status")
                .fetch_all(pool)
                .await?
        }
    };

    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        match EntryStatus::parse(&status) {
            Some(EntryStatus::Queued) => counts.queued = n as u64,
            Some(EntryStatus::Processing) => counts.processing = n as u64,
            Some(EntryStatus::Done) => counts.done = n as u64,
            Some(EntryStatus::Failed) => counts.failed = n as u64,
            None => {
                return Err(OutboxError::Storage(format!(
                    "unknown status '{}' in outbox_entries",
                    status
                )))
            }
        }
    }
    Ok(counts)
}

/// Map a database row into an `Entry`.
fn row_to_entry(row: SqliteRow) -> OutboxResult<Entry> {
    let id: String = row.try_get("id")?;
    let channel: String = row.try_get("channel")?;

    let payload_str: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_str)?;

    let headers_str: Option<String> = row.try_get("headers")?;
    let headers: Option<HashMap<String, String>> = headers_str
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    let idempotency_key: Option<String> = row.try_get("idempotency_key")?;
    let priority: i64 = row.try_get("priority")?;
    let attempt: i64 = row.try_get("attempt")?;
    let next_attempt_at: Option<i64> = row.try_get("next_attempt_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    let status_str: String = row.try_get("status")?;
    let status = EntryStatus::parse(&status_str).ok_or_else(|| {
        OutboxError::Storage(format!("unknown status '{}' in outbox_entries", status_str))
    })?;

    let error: Option<String> = row.try_get("error")?;

    Ok(Entry {
        id: EntryId::from_string(id),
        channel,
        payload,
        headers,
        idempotency_key,
        priority: priority as i32,
        attempt: attempt as u32,
        next_attempt_at: next_attempt_at.map(millis_to_utc).transpose()?,
        created_at: millis_to_utc(created_at)?,
        updated_at: millis_to_utc(updated_at)?,
        status,
        error,
    })
}

fn millis_to_utc(ms: i64) -> OutboxResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| OutboxError::Storage(format!("invalid timestamp {} in outbox_entries", ms)))
}
