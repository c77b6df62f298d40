use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio_stream::StreamExt;

use postbox::{
    EnqueueRequest, Entry, EntryStatus, MemoryStore, Outbox, OutboxConfig, OutboxError,
    OutboxStore, OutboxTransport, RetryPolicy, SendResult,
};

/// Transport that always succeeds and records what it saw
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Entry>>,
}

#[async_trait]
impl OutboxTransport for RecordingTransport {
    async fn send(&self, entry: &Entry) -> SendResult {
        self.sent.lock().push(entry.clone());
        SendResult::ok()
    }
}

/// Transport that always fails permanently
#[derive(Default)]
struct PermanentTransport {
    sends: AtomicUsize,
}

#[async_trait]
impl OutboxTransport for PermanentTransport {
    async fn send(&self, _entry: &Entry) -> SendResult {
        self.sends.fetch_add(1, Ordering::SeqCst);
        SendResult::permanent("HTTP 422")
    }
}

/// Transport that fails transiently N times, then succeeds
struct FlakyTransport {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyTransport {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OutboxTransport for FlakyTransport {
    async fn send(&self, _entry: &Entry) -> SendResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            SendResult::transient("HTTP 503")
        } else {
            SendResult::ok()
        }
    }
}

/// Transport that sleeps and tracks peak concurrency
#[derive(Default)]
struct SlowTransport {
    current: AtomicUsize,
    peak: AtomicUsize,
    sends: AtomicUsize,
}

#[async_trait]
impl OutboxTransport for SlowTransport {
    async fn send(&self, _entry: &Entry) -> SendResult {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.sends.fetch_add(1, Ordering::SeqCst);
        SendResult::ok()
    }
}

/// Transport that rate-limits the first call, then succeeds
struct RateLimitedTransport {
    calls: AtomicUsize,
    retry_after: Duration,
}

#[async_trait]
impl OutboxTransport for RateLimitedTransport {
    async fn send(&self, _entry: &Entry) -> SendResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            SendResult::rate_limited(self.retry_after, "HTTP 429")
        } else {
            SendResult::ok()
        }
    }
}

fn manual_config() -> OutboxConfig {
    OutboxConfig::default().with_auto_start(false)
}

fn outbox_with<T: OutboxTransport + 'static>(
    transport: Arc<T>,
    config: OutboxConfig,
) -> (Outbox, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let outbox = Outbox::new(store.clone(), transport).with_config(config);
    (outbox, store)
}

/// Scenario 1: basic enqueue + drain
#[tokio::test]
async fn test_enqueue_drain_delivers() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, store) = outbox_with(transport.clone(), manual_config());
    outbox.init().await.unwrap();

    outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-1"})))
        .await
        .unwrap();
    outbox.drain().await.unwrap();

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "orders");
    assert_eq!(sent[0].payload, json!({"orderId": "o-1"}));

    let picked = store.pick_for_processing(10, Utc::now()).await.unwrap();
    assert!(picked.is_empty());
}

/// Scenario 2: higher priority overtakes older entries
#[tokio::test]
async fn test_priority_overtake() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, store) = outbox_with(transport, manual_config());
    outbox.init().await.unwrap();

    outbox
        .enqueue(EnqueueRequest::new("orders", json!("low")).with_priority(0))
        .await
        .unwrap();
    outbox
        .enqueue(EnqueueRequest::new("orders", json!("high")).with_priority(10))
        .await
        .unwrap();

    let picked = store.pick_for_processing(10, Utc::now()).await.unwrap();
    let payloads: Vec<&serde_json::Value> = picked.iter().map(|e| &e.payload).collect();
    assert_eq!(payloads, vec![&json!("high"), &json!("low")]);
}

/// Scenario 3: not_before delays eligibility
#[tokio::test]
async fn test_delayed_start() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, store) = outbox_with(transport, manual_config());
    outbox.init().await.unwrap();

    let now = Utc::now();
    outbox
        .enqueue(
            EnqueueRequest::new("orders", json!({"deferred": true}))
                .with_not_before(now + ChronoDuration::minutes(5)),
        )
        .await
        .unwrap();

    let picked = store.pick_for_processing(10, now).await.unwrap();
    assert!(picked.is_empty());

    let later = now + ChronoDuration::minutes(5) + ChronoDuration::seconds(1);
    let picked = store.pick_for_processing(10, later).await.unwrap();
    assert_eq!(picked.len(), 1);
}

/// Scenario 4: transient failures retry until success
#[tokio::test]
async fn test_transient_retry_succeeds() {
    let transport = Arc::new(FlakyTransport::new(2));
    let config = manual_config().with_retry(RetryPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        max_attempts: 5,
    });
    let (outbox, store) = outbox_with(transport.clone(), config);
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-2"})))
        .await
        .unwrap();

    let mut entry = None;
    for _ in 0..6 {
        outbox.drain().await.unwrap();
        let current = store.get(&id).await.unwrap().unwrap();
        if current.status == EntryStatus::Done {
            entry = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(700)).await;
    }

    let entry = entry.expect("entry never reached done");
    assert_eq!(entry.attempt, 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    // The last schedule was in the past at the moment of success
    assert!(entry.next_attempt_at.unwrap() < Utc::now());

    let picked = store.pick_for_processing(10, Utc::now()).await.unwrap();
    assert!(picked.is_empty());
}

/// Scenario 5: permanent failure after exactly one send
#[tokio::test]
async fn test_permanent_failure_not_retried() {
    let transport = Arc::new(PermanentTransport::default());
    let (outbox, store) = outbox_with(transport.clone(), manual_config());
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-3"})))
        .await
        .unwrap();
    outbox.drain().await.unwrap();
    outbox.drain().await.unwrap();

    assert_eq!(transport.sends.load(Ordering::SeqCst), 1);

    let entry = store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some("HTTP 422"));
    assert_eq!(entry.attempt, 0);
}

/// Scenario 6: in-flight sends never exceed the concurrency bound
#[tokio::test]
async fn test_concurrency_bound() {
    let transport = Arc::new(SlowTransport::default());
    let config = manual_config().with_concurrency(2);
    let (outbox, _store) = outbox_with(transport.clone(), config);
    outbox.init().await.unwrap();

    for i in 0..5 {
        outbox
            .enqueue(EnqueueRequest::new("orders", json!({"n": i})))
            .await
            .unwrap();
    }
    outbox.drain().await.unwrap();

    assert_eq!(transport.sends.load(Ordering::SeqCst), 5);
    assert!(transport.peak.load(Ordering::SeqCst) <= 2);
}

/// Rate-limited results clamp the next attempt to the server's hint
#[tokio::test]
async fn test_rate_limit_clamps_schedule() {
    let transport = Arc::new(RateLimitedTransport {
        calls: AtomicUsize::new(0),
        retry_after: Duration::from_secs(60),
    });
    let (outbox, store) = outbox_with(transport.clone(), manual_config());
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-4"})))
        .await
        .unwrap();
    let before = Utc::now();
    outbox.drain().await.unwrap();

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    let entry = store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Queued);
    assert_eq!(entry.attempt, 1);
    assert!(entry.next_attempt_at.unwrap() >= before + ChronoDuration::seconds(60));
}

/// Retries stop scheduling once the attempt budget is exhausted
#[tokio::test]
async fn test_attempt_budget_schedules_never() {
    let transport = Arc::new(FlakyTransport::new(usize::MAX));
    let config = manual_config().with_retry(RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_attempts: 1,
    });
    let (outbox, store) = outbox_with(transport, config);
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-5"})))
        .await
        .unwrap();
    outbox.drain().await.unwrap();

    let entry = store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Queued);
    assert_eq!(entry.attempt, 1);
    // Scheduled far enough out to never run in practice
    assert!(entry.next_attempt_at.unwrap() > Utc::now() + ChronoDuration::days(300));
}

/// Transport that panics on the first call, then succeeds
struct PanickyTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl OutboxTransport for PanickyTransport {
    async fn send(&self, _entry: &Entry) -> SendResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("transport blew up");
        }
        SendResult::ok()
    }
}

/// A panicking transport takes the transient-retry path
#[tokio::test]
async fn test_transport_panic_is_transient() {
    let transport = Arc::new(PanickyTransport {
        calls: AtomicUsize::new(0),
    });
    let config = manual_config().with_retry(RetryPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(30),
        max_attempts: 5,
    });
    let (outbox, store) = outbox_with(transport.clone(), config);
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-9"})))
        .await
        .unwrap();

    outbox.drain().await.unwrap();
    let entry = store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Queued);
    assert_eq!(entry.attempt, 1);
    assert!(entry.error.as_deref().unwrap().contains("panicked"));

    let mut delivered = false;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        outbox.drain().await.unwrap();
        if store.get(&id).await.unwrap().unwrap().status == EntryStatus::Done {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "entry never recovered from the panic");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

/// Facade operations fail before init
#[tokio::test]
async fn test_facade_requires_init() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, _store) = outbox_with(transport, manual_config());

    let result = outbox
        .enqueue(EnqueueRequest::new("orders", json!({})))
        .await;
    assert!(matches!(result, Err(OutboxError::NotInitialized)));

    assert!(matches!(outbox.pause(), Err(OutboxError::NotInitialized)));
}

/// Enqueue validation: empty channel and oversized idempotency keys
#[tokio::test]
async fn test_enqueue_validation() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, _store) = outbox_with(transport, manual_config());
    outbox.init().await.unwrap();

    let result = outbox.enqueue(EnqueueRequest::new("", json!({}))).await;
    assert!(matches!(result, Err(OutboxError::InvalidEntry(_))));

    let result = outbox
        .enqueue(EnqueueRequest::new("orders", json!({})).with_idempotency_key("x".repeat(257)))
        .await;
    assert!(matches!(result, Err(OutboxError::InvalidEntry(_))));

    let result = outbox
        .enqueue(EnqueueRequest::new("orders", json!({})).with_idempotency_key(""))
        .await;
    assert!(matches!(result, Err(OutboxError::InvalidEntry(_))));
}

/// Auto-start delivers without explicit drain
#[tokio::test]
async fn test_auto_start_delivers_in_background() {
    let transport = Arc::new(RecordingTransport::default());
    let config = OutboxConfig::default().with_heartbeat(Duration::from_millis(50));
    let (outbox, store) = outbox_with(transport.clone(), config);
    outbox.init().await.unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-6"})))
        .await
        .unwrap();

    let mut delivered = false;
    for _ in 0..40 {
        if let Some(entry) = store.get(&id).await.unwrap() {
            if entry.status == EntryStatus::Done {
                delivered = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(delivered, "entry was not delivered by the background loop");

    outbox.close().await.unwrap();
}

/// Paused outbox claims nothing until resumed
#[tokio::test]
async fn test_pause_blocks_claims() {
    let transport = Arc::new(RecordingTransport::default());
    let config = OutboxConfig::default().with_heartbeat(Duration::from_millis(50));
    let (outbox, store) = outbox_with(transport.clone(), config);
    outbox.init().await.unwrap();
    outbox.pause().unwrap();

    let id = outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-7"})))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let entry = store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Queued);
    assert!(transport.sent.lock().is_empty());

    outbox.resume().unwrap();
    let mut delivered = false;
    for _ in 0..40 {
        let entry = store.get(&id).await.unwrap().unwrap();
        if entry.status == EntryStatus::Done {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(delivered, "entry was not delivered after resume");

    outbox.close().await.unwrap();
}

/// watch() composes store counts with scheduler flags
#[tokio::test]
async fn test_watch_reports_state() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, _store) = outbox_with(transport, manual_config());
    outbox.init().await.unwrap();

    outbox
        .enqueue(EnqueueRequest::new("orders", json!({"orderId": "o-8"})))
        .await
        .unwrap();

    let mut states = outbox.watch().unwrap();
    let first = tokio::time::timeout(Duration::from_secs(1), states.next())
        .await
        .expect("timed out waiting for state")
        .expect("state stream ended");

    assert!(!first.is_running);
    assert!(!first.is_paused);
    assert_eq!(first.queued_count, 1);
    assert_eq!(first.processing_count, 0);
    assert_eq!(first.failed_count, 0);

    outbox.drain().await.unwrap();

    let mut latest = first;
    while let Ok(Some(state)) =
        tokio::time::timeout(Duration::from_millis(200), states.next()).await
    {
        latest = state;
    }
    assert_eq!(latest.queued_count, 0);
    assert_eq!(latest.processing_count, 0);
}

/// clear removes entries per channel through the facade
#[tokio::test]
async fn test_clear_by_channel() {
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, store) = outbox_with(transport, manual_config());
    outbox.init().await.unwrap();

    outbox
        .enqueue(EnqueueRequest::new("orders", json!({"n": 1})))
        .await
        .unwrap();
    outbox
        .enqueue(EnqueueRequest::new("emails", json!({"n": 2})))
        .await
        .unwrap();

    outbox.clear(Some("orders")).await.unwrap();
    let counts = store.status_counts(None).await.unwrap();
    assert_eq!(counts.total(), 1);

    outbox.clear(None).await.unwrap();
    assert_eq!(store.status_counts(None).await.unwrap().total(), 0);
}
