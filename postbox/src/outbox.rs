use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::OutboxConfig;
use crate::observability::{names, MetricsSink, NoopMetrics};
use crate::scheduler::Scheduler;
use crate::store::{BoxStream, OutboxStore};
use crate::transport::OutboxTransport;
use crate::{EnqueueRequest, Entry, EntryId, OutboxError, OutboxResult, OutboxState};

/// Longest accepted idempotency key
const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// The outbox facade: owns the store, transport, metrics sink, and the
/// lazily constructed scheduler.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn OutboxTransport>,
    metrics: Arc<dyn MetricsSink>,
    config: OutboxConfig,
    scheduler: RwLock<Option<Arc<Scheduler>>>,
    initialized: AtomicBool,
}

impl Outbox {
    /// Create an outbox over a store and transport with default config
    pub fn new(store: Arc<dyn OutboxStore>, transport: Arc<dyn OutboxTransport>) -> Self {
        Self {
            store,
            transport,
            metrics: Arc::new(NoopMetrics),
            config: OutboxConfig::default(),
            scheduler: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create an outbox with custom configuration
    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Initialize the store and construct the scheduler. Idempotent; must
    /// precede all other operations.
    pub async fn init(&self) -> OutboxResult<()> {
        self.store.init().await?;

        {
            let mut scheduler = self.scheduler.write();
            if scheduler.is_none() {
                *scheduler = Some(Arc::new(Scheduler::new(
                    self.store.clone(),
                    self.transport.clone(),
                    self.metrics.clone(),
                    self.config.clone(),
                )));
            }
        }
        self.initialized.store(true, Ordering::Release);

        if self.config.auto_start {
            self.scheduler()?.start();
        }

        info!(auto_start = self.config.auto_start, "outbox initialized");
        Ok(())
    }

    /// Queue an entry for delivery. Returns the generated entry id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> OutboxResult<EntryId> {
        self.ensure_initialized()?;

        if request.channel.is_empty() {
            return Err(OutboxError::InvalidEntry("channel must not be empty".into()));
        }
        if let Some(key) = request.idempotency_key.as_deref() {
            if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(OutboxError::InvalidEntry(format!(
                    "idempotency key must be 1..={} chars",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
        }

        let id = EntryId::new();
        let now = Utc::now();
        let mut entry = Entry::new(id.clone(), request.channel, request.payload, now);
        entry.headers = request.headers;
        entry.idempotency_key = request.idempotency_key;
        entry.priority = request.priority;
        entry.next_attempt_at = request.not_before;

        self.store.insert(entry).await?;
        self.metrics.incr_counter(names::ENQUEUED, 1);
        debug!(entry_id = %id, "entry enqueued");

        if self.config.auto_start {
            self.scheduler()?.kick();
        }

        Ok(id)
    }

    /// Process until no ready work remains
    pub async fn drain(&self) -> OutboxResult<()> {
        self.ensure_initialized()?;
        self.scheduler()?.drain().await
    }

    /// Stop claiming work without stopping the heartbeat
    pub fn pause(&self) -> OutboxResult<()> {
        self.ensure_initialized()?;
        self.scheduler()?.pause();
        Ok(())
    }

    /// Resume claiming work
    pub fn resume(&self) -> OutboxResult<()> {
        self.ensure_initialized()?;
        self.scheduler()?.resume();
        Ok(())
    }

    /// Delete all entries, or only those in the given channel
    pub async fn clear(&self, channel: Option<&str>) -> OutboxResult<()> {
        self.ensure_initialized()?;
        self.store.clear(channel).await
    }

    /// Lazy stream of outbox states: store counts composed with the
    /// scheduler's live flags, duplicates suppressed.
    pub fn watch(&self) -> OutboxResult<BoxStream<OutboxState>> {
        self.ensure_initialized()?;
        let scheduler = self.scheduler()?;
        let last: Arc<Mutex<Option<OutboxState>>> = Arc::new(Mutex::new(None));

        let stream = self
            .store
            .watch_status()
            .map(move |counts| OutboxState {
                is_paused: scheduler.is_paused(),
                is_running: scheduler.is_running(),
                queued_count: counts.queued,
                processing_count: counts.processing,
                failed_count: counts.failed,
            })
            .filter_map(move |state| {
                let emit = {
                    let mut last = last.lock();
                    if *last == Some(state) {
                        false
                    } else {
                        *last = Some(state);
                        true
                    }
                };
                futures_util::future::ready(emit.then_some(state))
            });

        Ok(Box::pin(stream))
    }

    /// Stop the scheduler and close the store
    pub async fn close(&self) -> OutboxResult<()> {
        if let Some(scheduler) = self.scheduler.read().clone() {
            scheduler.stop();
        }
        self.initialized.store(false, Ordering::Release);
        self.store.close().await?;
        info!("outbox closed");
        Ok(())
    }

    /// Store reference, for conformance checks and diagnostics
    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    fn ensure_initialized(&self) -> OutboxResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(OutboxError::NotInitialized)
        }
    }

    fn scheduler(&self) -> OutboxResult<Arc<Scheduler>> {
        self.scheduler
            .read()
            .clone()
            .ok_or(OutboxError::NotInitialized)
    }
}
