use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::OutboxConfig;
use crate::observability::{names, MetricsSink};
use crate::store::OutboxStore;
use crate::transport::{OutboxTransport, SendResult};
use crate::{Entry, EntryId, OutboxResult};

/// Cooperative scheduler: claims ready entries from the store, dispatches
/// them through the transport, and settles their fate.
///
/// Runs a single heartbeat loop; per-entry work is spawned, gated by the
/// in-flight set so at most `concurrency` entries are processing at once.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn OutboxTransport>,
    metrics: Arc<dyn MetricsSink>,
    config: OutboxConfig,
    in_flight: Mutex<HashSet<EntryId>>,
    running: AtomicBool,
    paused: AtomicBool,
    kick: Notify,
    shutdown: Notify,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        transport: Arc<dyn OutboxTransport>,
        metrics: Arc<dyn MetricsSink>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                transport,
                metrics,
                config,
                in_flight: Mutex::new(HashSet::new()),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                kick: Notify::new(),
                shutdown: Notify::new(),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Start the heartbeat loop. Idempotent; clears the paused flag and
    /// performs one immediate tick.
    pub fn start(&self) {
        self.inner.paused.store(false, Ordering::Release);
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            SchedulerInner::run(inner).await;
        });
        *self.inner.heartbeat.lock() = Some(handle);
    }

    /// Cancel the heartbeat. In-flight entries are allowed to complete; no
    /// new work is claimed.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_one();
    }

    /// Stop claiming work without cancelling the heartbeat
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Resume claiming work; kicks an immediate tick when running
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        if self.is_running() {
            self.kick();
        }
    }

    /// Ask the loop for an immediate tick (used by enqueue)
    pub fn kick(&self) {
        self.inner.kick.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Tick until no ready work remains and nothing is in flight.
    ///
    /// Works even when the scheduler is stopped or paused: the prior flags
    /// are saved, a running unpaused scheduler is impersonated for the
    /// duration, and the flags are restored afterwards.
    pub async fn drain(&self) -> OutboxResult<()> {
        let was_running = self.inner.running.swap(true, Ordering::AcqRel);
        let was_paused = self.inner.paused.swap(false, Ordering::AcqRel);

        let result = SchedulerInner::drain_loop(&self.inner).await;

        self.inner.running.store(was_running, Ordering::Release);
        self.inner.paused.store(was_paused, Ordering::Release);
        result
    }
}

impl SchedulerInner {
    async fn run(inner: Arc<Self>) {
        info!("outbox scheduler started");
        let mut ticker = tokio::time::interval(inner.config.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = ticker.tick() => {}
                _ = inner.kick.notified() => {}
            }

            if !inner.running.load(Ordering::Acquire) {
                break;
            }

            if let Err(err) = Self::tick(&inner).await {
                // Catastrophic store failure: stop rather than spin
                error!("outbox tick failed, stopping scheduler: {}", err);
                inner.running.store(false, Ordering::Release);
                break;
            }
        }

        info!("outbox scheduler stopped");
    }

    async fn tick(inner: &Arc<Self>) -> OutboxResult<()> {
        if inner.paused.load(Ordering::Acquire) || !inner.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let now = Utc::now();
        inner.reclaim_stuck(now).await?;

        let slots = {
            let in_flight = inner.in_flight.lock();
            inner.config.concurrency.saturating_sub(in_flight.len())
        };
        if slots == 0 {
            return Ok(());
        }

        let candidates = inner.store.pick_for_processing(slots, now).await?;
        for entry in candidates {
            {
                let mut in_flight = inner.in_flight.lock();
                if in_flight.len() >= inner.config.concurrency {
                    break;
                }
                if !in_flight.insert(entry.id.clone()) {
                    continue;
                }
            }

            let task_inner = inner.clone();
            tokio::spawn(async move {
                SchedulerInner::process_entry(task_inner, entry).await;
            });
        }

        Ok(())
    }

    async fn process_entry(inner: Arc<Self>, entry: Entry) {
        let id = entry.id.clone();
        if let Err(err) = inner.dispatch(entry).await {
            error!(entry_id = %id, "failed to settle entry: {}", err);
        }
        inner.in_flight.lock().remove(&id);
    }

    /// Claim, send, settle: the per-entry pipeline
    async fn dispatch(&self, entry: Entry) -> OutboxResult<()> {
        let claimed = entry.claimed(Utc::now());
        self.store.update(claimed.clone()).await?;

        // Send on its own task so a panicking transport settles as a
        // transient failure instead of leaking the in-flight slot
        let transport = self.transport.clone();
        let send_entry = claimed.clone();
        let started = Instant::now();
        let result = match tokio::spawn(async move { transport.send(&send_entry).await }).await {
            Ok(result) => result,
            Err(err) => SendResult::transient(format!("transport panicked: {}", err)),
        };
        self.metrics
            .record_duration(names::SEND_DURATION, started.elapsed());

        let now = Utc::now();
        if result.success {
            self.store.mark_done(&claimed.id).await?;
            self.metrics.incr_counter(names::SENT, 1);
            debug!(entry_id = %claimed.id, channel = %claimed.channel, "entry delivered");
        } else if result.permanently_failed {
            let err = result.error.as_deref().unwrap_or("permanent");
            self.store.mark_failed(&claimed.id, err, None).await?;
            self.metrics.incr_counter(names::FAILED, 1);
            error!(entry_id = %claimed.id, "entry failed permanently: {}", err);
        } else {
            let attempt = claimed.attempt + 1;
            let previous_delay = claimed
                .next_attempt_at
                .and_then(|at| (at - claimed.created_at).to_std().ok());
            let mut next = self.config.retry.next_attempt(attempt, now, previous_delay);

            // Rate-limited servers set a floor under the computed schedule
            if let Some(after) = result.retry_after {
                let floor = now + ChronoDuration::milliseconds(after.as_millis() as i64);
                if floor > next {
                    next = floor;
                }
            }

            let err = result.error.clone().unwrap_or_else(|| "transient".to_string());
            warn!(
                entry_id = %claimed.id,
                attempt,
                next_attempt_at = %next,
                "entry failed, scheduling retry: {}", err
            );
            self.store.update(claimed.retried(next, err, now)).await?;
            self.metrics.incr_counter(names::RETRIED, 1);
        }

        Ok(())
    }

    async fn reclaim_stuck(&self, now: DateTime<Utc>) -> OutboxResult<()> {
        let cutoff =
            now - ChronoDuration::milliseconds(self.config.lock_timeout.as_millis() as i64);
        let reclaimed = self.store.reclaim_stuck(cutoff, now).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed stuck processing entries");
            self.metrics.incr_counter(names::RECLAIMED, reclaimed);
        }
        Ok(())
    }

    async fn drain_loop(inner: &Arc<Self>) -> OutboxResult<()> {
        loop {
            Self::tick(inner).await?;

            let ready = inner
                .store
                .pick_for_processing(inner.config.concurrency, Utc::now())
                .await?;
            let idle = inner.in_flight.lock().is_empty();
            if ready.is_empty() && idle {
                return Ok(());
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
