use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{BoxStream, OutboxStore};
use crate::{Entry, EntryId, EntryStatus, OutboxError, OutboxResult, StatusCounts};

/// In-memory store for testing and development.
///
/// Implements the same contract as the persistent store; cheap to clone
/// and safe to share across tasks.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<EntryId, Entry>>>,
    initialized: Arc<AtomicBool>,
    changed: broadcast::Sender<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            initialized: Arc::new(AtomicBool::new(false)),
            changed,
        }
    }

    fn ensure_initialized(&self) -> OutboxResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(OutboxError::NotInitialized)
        }
    }

    fn notify(&self) {
        // No receivers is fine
        let _ = self.changed.send(());
    }

    fn count_queued(&self, channel: Option<&str>) -> u64 {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|e| e.status == EntryStatus::Queued)
            .filter(|e| channel.map_or(true, |c| e.channel == c))
            .count() as u64
    }

    fn counts(&self, channel: Option<&str>) -> StatusCounts {
        let entries = self.entries.read();
        let mut counts = StatusCounts::default();
        for entry in entries.values() {
            if let Some(c) = channel {
                if entry.channel != c {
                    continue;
                }
            }
            match entry.status {
                EntryStatus::Queued => counts.queued += 1,
                EntryStatus::Processing => counts.processing += 1,
                EntryStatus::Done => counts.done += 1,
                EntryStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            initialized: self.initialized.clone(),
            changed: self.changed.clone(),
        }
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn init(&self) -> OutboxResult<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn insert(&self, entry: Entry) -> OutboxResult<()> {
        self.ensure_initialized()?;
        self.entries.write().insert(entry.id.clone(), entry);
        self.notify();
        Ok(())
    }

    async fn update(&self, entry: Entry) -> OutboxResult<()> {
        self.ensure_initialized()?;
        {
            let mut entries = self.entries.write();
            match entries.get_mut(&entry.id) {
                Some(slot) => *slot = entry,
                None => return Ok(()),
            }
        }
        self.notify();
        Ok(())
    }

    async fn mark_done(&self, id: &EntryId) -> OutboxResult<()> {
        self.ensure_initialized()?;
        let changed = {
            let mut entries = self.entries.write();
            match entries.get_mut(id) {
                Some(entry) => {
                    *entry = entry.clone().done(Utc::now());
                    true
                }
                None => false,
            }
        };
        if changed {
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
        self.ensure_initialized()?;
        let now = Utc::now();
        let changed = {
            let mut entries = self.entries.write();
            match entries.get_mut(id) {
                Some(entry) => {
                    *entry = match next_attempt {
                        // Soft retry: back to the queue with a schedule
                        Some(at) => entry.clone().retried(at, error, now),
                        None => entry.clone().failed(error, now),
                    };
                    true
                }
                None => false,
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> OutboxResult<Option<Entry>> {
        self.ensure_initialized()?;
        Ok(self.entries.read().get(id).cloned())
    }

    async fn pick_for_processing(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> OutboxResult<Vec<Entry>> {
        self.ensure_initialized()?;
        let entries = self.entries.read();
        let mut ready: Vec<Entry> = entries
            .values()
            .filter(|e| e.is_ready(now))
            .cloned()
            .collect();
        // Higher priority first, FIFO within a priority band
        ready.sort_by_key(|e| (Reverse(e.priority), e.created_at));
        ready.truncate(limit);
        Ok(ready)
    }

    async fn reclaim_stuck(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OutboxResult<u64> {
        self.ensure_initialized()?;
        let reclaimed = {
            let mut entries = self.entries.write();
            let mut reclaimed = 0u64;
            for entry in entries.values_mut() {
                if entry.status == EntryStatus::Processing && entry.updated_at < cutoff {
                    entry.status = EntryStatus::Queued;
                    entry.attempt += 1;
                    entry.error = Some("lock timeout".to_string());
                    entry.updated_at = now;
                    reclaimed += 1;
                }
            }
            reclaimed
        };
        if reclaimed > 0 {
            self.notify();
        }
        Ok(reclaimed)
    }

    async fn clear(&self, channel: Option<&str>) -> OutboxResult<()> {
        self.ensure_initialized()?;
        {
            let mut entries = self.entries.write();
            match channel {
                Some(c) => entries.retain(|_, e| e.channel != c),
                None => entries.clear(),
            }
        }
        self.notify();
        Ok(())
    }

    async fn status_counts(&self, channel: Option<&str>) -> OutboxResult<StatusCounts> {
        self.ensure_initialized()?;
        Ok(self.counts(channel))
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
                        let count = store.count_queued(channel.as_deref());
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
                        let counts = store.counts(None);
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
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, channel: &str, priority: i32) -> Entry {
        let mut e = Entry::new(
            EntryId::from(id),
            channel.to_string(),
            json!({"n": id}),
            Utc::now(),
        );
        e.priority = priority;
        e
    }

    #[tokio::test]
    async fn operations_fail_before_init() {
        let store = MemoryStore::new();
        let result = store.insert(entry("a", "test", 0)).await;
        assert!(matches!(result, Err(OutboxError::NotInitialized)));
    }

    #[tokio::test]
    async fn insert_is_upsert() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        store.insert(entry("a", "test", 0)).await.unwrap();
        store.insert(entry("a", "test", 5)).await.unwrap();

        let counts = store.status_counts(None).await.unwrap();
        assert_eq!(counts.total(), 1);

        let picked = store.pick_for_processing(10, Utc::now()).await.unwrap();
        assert_eq!(picked[0].priority, 5);
    }

    #[tokio::test]
    async fn pick_orders_by_priority_then_age() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        let mut old_low = entry("low", "test", 0);
        old_low.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.insert(old_low).await.unwrap();
        store.insert(entry("high", "test", 10)).await.unwrap();

        let picked = store.pick_for_processing(10, Utc::now()).await.unwrap();
        let ids: Vec<&str> = picked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn update_is_noop_for_absent_id() {
        let store = MemoryStore::new();
        store.init().await.unwrap();

        store.update(entry("ghost", "test", 0)).await.unwrap();
        assert_eq!(store.status_counts(None).await.unwrap().total(), 0);
    }
}
