//! Delivery engine
//!
//! [`Shipper`] is the embedder-facing handle. Behind it a single worker task
//! owns every mutable piece of the pipeline: the pending queue, the retry
//! backlog, the offline store and the envelope builder. Events and control
//! commands travel down one channel, so a flush issued after a write always
//! observes that write. `write` itself is synchronous and infallible; under
//! backpressure it drops the newest event rather than block the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bon::bon;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::config::{build_header_map, validate_auth_token, DeliveryConfig};
use crate::envelope::{EnvelopeBuilder, UserIdProvider};
use crate::error::{Error, Result};
use crate::event::{EventRecord, QueuedEvent};
use crate::limiter::RateLimiter;
use crate::queue::{pack_batches, PendingQueue};
use crate::redact::SecretString;
use crate::retry::{backoff_delay, RetryBacklog};
use crate::store::{FileKvStore, KeyValueStore, OfflineStore};
use crate::transport::{
    DeliveryOutcome, HttpTransport, SendMode, StaticTokenProvider, TokenProvider, Transmitter,
    Transport,
};

/// Counters for the delivery pipeline.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Events accepted by `write`
    pub enqueued: AtomicU64,
    /// Events delivered (confirmed 2xx or quick hand-off)
    pub delivered: AtomicU64,
    /// Batch send attempts that failed
    pub send_failures: AtomicU64,
    /// Retry attempts scheduled
    pub retries_scheduled: AtomicU64,
    /// Events dropped by the rate limiter
    pub rate_limited: AtomicU64,
    /// Events dropped because the intake queue was full
    pub dropped_queue_full: AtomicU64,
    /// Events dropped after exhausting retries with no offline store
    pub dropped_exhausted: AtomicU64,
    /// Events written to offline storage
    pub persisted: AtomicU64,
    /// Events recovered from offline storage
    pub recovered: AtomicU64,
    /// Timestamp of the last delivery failure (seconds since epoch)
    pub last_failure_ts: AtomicU64,
}

impl DeliveryMetrics {
    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> DeliveryMetricsSnapshot {
        DeliveryMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            last_failure_ts: self.last_failure_ts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery metrics at a point in time
#[derive(Debug, Clone)]
pub struct DeliveryMetricsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub send_failures: u64,
    pub retries_scheduled: u64,
    pub rate_limited: u64,
    pub dropped_queue_full: u64,
    pub dropped_exhausted: u64,
    pub persisted: u64,
    pub recovered: u64,
    pub last_failure_ts: u64,
}

/// Host lifecycle transitions forwarded into the worker.
#[derive(Debug, Clone, Copy)]
enum LifecycleSignal {
    VisibilityHidden,
    BeforeTeardown,
    ConnectivityLost,
    ConnectivityRestored,
}

/// What prompted a flush; logged for diagnosis.
#[derive(Debug, Clone, Copy)]
enum FlushReason {
    Timer,
    QueueFull,
    Explicit,
    RetryDue,
    Lifecycle,
    Recovery,
    Shutdown,
}

enum Msg {
    Event(QueuedEvent),
    Flush {
        done: oneshot::Sender<()>,
    },
    Signal {
        signal: LifecycleSignal,
        done: oneshot::Sender<()>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Telemetry delivery handle with batching, retries and offline fallback.
///
/// Construct one per collector endpoint, keep it for the life of the
/// process, and finish with [`close`](Shipper::close) so buffered events get
/// a confirmed final flush. Dropping the handle instead still flushes, but
/// nothing waits for the result.
pub struct Shipper {
    tx: mpsc::Sender<Msg>,
    limiter: Mutex<RateLimiter>,
    metrics: Arc<DeliveryMetrics>,
    lifecycle_enabled: bool,
    session_id: String,
}

#[bon]
impl Shipper {
    /// Create a shipper and spawn its delivery worker.
    ///
    /// Must be called within a Tokio runtime. Only `endpoint` is required;
    /// every other knob falls back to the documented default.
    #[builder]
    pub fn new(
        endpoint: impl Into<String>,
        max_batch_count: Option<usize>,
        flush_interval: Option<Duration>,
        max_payload_bytes: Option<usize>,
        quick_send_limit_bytes: Option<usize>,
        enable_offline_storage: Option<bool>,
        #[builder(into)] offline_storage_key_prefix: Option<String>,
        max_offline_events: Option<usize>,
        max_retries: Option<u32>,
        retry_delay: Option<Duration>,
        retry_jitter: Option<bool>,
        #[builder(into)] auth_token: Option<String>,
        custom_headers: Option<HashMap<String, String>>,
        rate_limit_per_minute: Option<u32>,
        enable_lifecycle_handling: Option<bool>,
        max_queue_events: Option<usize>,
        user_id_provider: Option<Arc<dyn UserIdProvider>>,
        token_provider: Option<Arc<dyn TokenProvider>>,
        transport: Option<Arc<dyn Transport>>,
        offline_store: Option<Arc<dyn KeyValueStore>>,
    ) -> Result<Self> {
        let mut config = DeliveryConfig::new(&endpoint.into())?;
        if let Some(value) = max_batch_count {
            config.max_batch_count = value;
        }
        if let Some(value) = flush_interval {
            config.flush_interval = value;
        }
        if let Some(value) = max_payload_bytes {
            config.max_payload_bytes = value;
        }
        if let Some(value) = quick_send_limit_bytes {
            config.quick_send_limit_bytes = value;
        }
        if let Some(value) = enable_offline_storage {
            config.enable_offline_storage = value;
        }
        if let Some(value) = offline_storage_key_prefix {
            config.offline_storage_key_prefix = value;
        }
        if let Some(value) = max_offline_events {
            config.max_offline_events = value;
        }
        if let Some(value) = max_retries {
            config.max_retries = value;
        }
        if let Some(value) = retry_delay {
            config.retry_delay = value;
        }
        if let Some(value) = retry_jitter {
            config.retry_jitter = value;
        }
        config.auth_token = auth_token.map(SecretString::new);
        if let Some(headers) = &custom_headers {
            config.custom_headers = build_header_map(headers)?;
        }
        if let Some(value) = rate_limit_per_minute {
            config.rate_limit_per_minute = value;
        }
        if let Some(value) = enable_lifecycle_handling {
            config.enable_lifecycle_handling = value;
        }
        if let Some(value) = max_queue_events {
            config.max_queue_events = value.max(1);
        }

        if config.max_batch_count == 0 {
            return Err(Error::Configuration("max_batch_count must be at least 1".into()));
        }
        if config.flush_interval.is_zero() {
            return Err(Error::Configuration("flush_interval must be non-zero".into()));
        }
        if config.max_payload_bytes == 0 {
            return Err(Error::Configuration("max_payload_bytes must be non-zero".into()));
        }
        if let Some(token) = &config.auth_token {
            validate_auth_token(token)?;
        }

        let token_provider = token_provider.or_else(|| {
            config.auth_token.clone().map(|token| {
                Arc::new(StaticTokenProvider::new(token)) as Arc<dyn TokenProvider>
            })
        });
        let transport =
            transport.unwrap_or_else(|| Arc::new(HttpTransport::new()) as Arc<dyn Transport>);
        let transmitter = Transmitter::new(
            transport,
            token_provider,
            config.endpoint.clone(),
            config.custom_headers.clone(),
            config.quick_send_limit_bytes,
        );

        let offline = if config.enable_offline_storage {
            let kv = match offline_store {
                Some(kv) => kv,
                None => {
                    let dir = std::env::temp_dir().join("logship");
                    let kv = FileKvStore::new(&dir).map_err(|e| {
                        Error::Configuration(format!(
                            "offline store directory {} is not usable: {e}",
                            dir.display()
                        ))
                    })?;
                    Arc::new(kv) as Arc<dyn KeyValueStore>
                }
            };
            Some(OfflineStore::new(
                kv,
                &config.offline_storage_key_prefix,
                config.max_offline_events,
            ))
        } else {
            None
        };

        let envelopes = EnvelopeBuilder::new(user_id_provider);
        let session_id = envelopes.session_id().to_string();
        let metrics = Arc::new(DeliveryMetrics::default());
        let limiter = Mutex::new(RateLimiter::new(config.rate_limit_per_minute));
        let (tx, rx) = mpsc::channel(config.max_queue_events);

        let worker = Worker {
            config: config.clone(),
            rx,
            queue: PendingQueue::new(),
            backlog: RetryBacklog::new(),
            envelopes,
            transmitter,
            offline_store: offline,
            metrics: metrics.clone(),
            offline: false,
        };
        tokio::spawn(worker.run());

        Ok(Self {
            tx,
            limiter,
            metrics,
            lifecycle_enabled: config.enable_lifecycle_handling,
            session_id,
        })
    }

    /// Accept one event for delivery.
    ///
    /// Never blocks and never fails: over-rate events and events that find
    /// the intake queue full are counted, logged and dropped.
    pub fn write(&self, event: EventRecord) {
        let admitted = {
            let mut limiter = self.limiter.lock().unwrap_or_else(|e| e.into_inner());
            limiter.admit()
        };
        if !admitted {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("rate limit exceeded, event dropped");
            return;
        }

        match self.tx.try_send(Msg::Event(QueuedEvent::new(event))) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("intake queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("delivery worker gone, event discarded");
            }
        }
    }

    /// Flush everything written so far and wait for the attempt to finish.
    ///
    /// The flush command travels down the same channel as events, so every
    /// prior `write` is included. Resolves even when sends fail; failed
    /// batches move to the retry backlog rather than surface here.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Msg::Flush { done }).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// The host UI went to the background; flush immediately in case the
    /// process is about to be killed.
    pub async fn visibility_hidden(&self) {
        self.signal(LifecycleSignal::VisibilityHidden).await;
    }

    /// The host is tearing down; flush with confirmed delivery only.
    pub async fn before_teardown(&self) {
        self.signal(LifecycleSignal::BeforeTeardown).await;
    }

    /// Network is gone. Delivery pauses; events keep accumulating in memory.
    pub async fn connectivity_lost(&self) {
        self.signal(LifecycleSignal::ConnectivityLost).await;
    }

    /// Network is back. Offline-stored events rejoin the retry backlog and a
    /// flush runs.
    pub async fn connectivity_restored(&self) {
        self.signal(LifecycleSignal::ConnectivityRestored).await;
    }

    /// Stop the worker after a final confirmed-only flush.
    ///
    /// Events still awaiting a retry are persisted when offline storage is
    /// enabled, otherwise dropped with a diagnostic.
    pub async fn close(self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Msg::Close { done }).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Get current metrics
    pub fn metrics(&self) -> DeliveryMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Session identifier stamped on every envelope from this shipper.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn signal(&self, signal: LifecycleSignal) {
        if !self.lifecycle_enabled {
            tracing::debug!(signal = ?signal, "lifecycle handling disabled, signal ignored");
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.tx.send(Msg::Signal { signal, done }).await.is_ok() {
            let _ = wait.await;
        }
    }
}

/// The worker task. Sole owner of all mutable delivery state.
struct Worker {
    config: DeliveryConfig,
    rx: mpsc::Receiver<Msg>,
    queue: PendingQueue,
    backlog: RetryBacklog,
    envelopes: EnvelopeBuilder,
    transmitter: Transmitter,
    offline_store: Option<OfflineStore>,
    metrics: Arc<DeliveryMetrics>,
    offline: bool,
}

impl Worker {
    async fn run(mut self) {
        self.recover_offline_events().await;

        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Consume the first immediate tick
        ticker.tick().await;

        loop {
            // While offline the retry wakeup is suppressed so the loop does
            // not spin on a backlog it cannot send.
            let retry_wakeup = if self.offline { None } else { self.backlog.next_due() };

            tokio::select! {
                _ = ticker.tick() => {
                    self.flush(FlushReason::Timer, SendMode::PreferQuick).await;
                }
                _ = async {
                    match retry_wakeup {
                        Some(due) => sleep_until(due).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.flush(FlushReason::RetryDue, SendMode::PreferQuick).await;
                    ticker.reset();
                }
                msg = self.rx.recv() => match msg {
                    Some(Msg::Event(event)) => {
                        if self.queue.len() >= self.config.max_queue_events {
                            self.metrics.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("pending queue full, event dropped");
                        } else {
                            self.queue.push(event);
                            if self.queue.should_flush(
                                self.config.max_batch_count,
                                self.config.max_payload_bytes,
                            ) {
                                self.flush(FlushReason::QueueFull, SendMode::PreferQuick).await;
                                ticker.reset();
                            }
                        }
                    }
                    Some(Msg::Flush { done }) => {
                        self.flush(FlushReason::Explicit, SendMode::PreferQuick).await;
                        ticker.reset();
                        let _ = done.send(());
                    }
                    Some(Msg::Signal { signal, done }) => {
                        self.handle_signal(signal).await;
                        ticker.reset();
                        let _ = done.send(());
                    }
                    Some(Msg::Close { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // All handles dropped; same path as an explicit close.
                        self.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_signal(&mut self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::VisibilityHidden => {
                self.flush(FlushReason::Lifecycle, SendMode::PreferQuick).await;
            }
            LifecycleSignal::BeforeTeardown => {
                self.flush(FlushReason::Lifecycle, SendMode::ConfirmedOnly).await;
            }
            LifecycleSignal::ConnectivityLost => {
                if !self.offline {
                    self.offline = true;
                    tracing::info!("connectivity lost, deliveries paused");
                }
            }
            LifecycleSignal::ConnectivityRestored => {
                if self.offline {
                    self.offline = false;
                    tracing::info!("connectivity restored, deliveries resumed");
                }
                self.recover_offline_events().await;
                self.flush(FlushReason::Recovery, SendMode::PreferQuick).await;
            }
        }
    }

    /// Drain due retries and all pending events, pack them, and send batch
    /// by batch. A flush with nothing to send is a no-op; a flush while
    /// offline defers everything.
    async fn flush(&mut self, reason: FlushReason, mode: SendMode) {
        if self.offline {
            tracing::debug!(reason = ?reason, "offline, flush deferred");
            return;
        }

        let due_retries = self.backlog.take_due(Instant::now());
        let fresh = self.queue.take_all();
        if due_retries.is_empty() && fresh.is_empty() {
            return;
        }

        tracing::debug!(
            reason = ?reason,
            retries = due_retries.len(),
            fresh = fresh.len(),
            "flushing"
        );

        let batches = pack_batches(
            due_retries,
            fresh,
            self.config.max_batch_count,
            self.config.max_payload_bytes,
        );
        for batch in batches {
            self.send_batch(batch, mode).await;
        }
    }

    async fn send_batch(&mut self, batch: Vec<QueuedEvent>, mode: SendMode) {
        let envelope = self.envelopes.build(&batch);
        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(err) => {
                // The envelope is built from sanitized values, so this is a
                // bug, not bad input. Drop instead of retrying forever.
                tracing::error!(error = %err, events = batch.len(), "envelope not serializable, batch dropped");
                self.metrics
                    .dropped_exhausted
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            }
        };

        match self.transmitter.send(body, mode).await {
            DeliveryOutcome::Delivered => {
                self.metrics
                    .delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            DeliveryOutcome::Failed => {
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.last_failure_ts.store(epoch_secs(), Ordering::Relaxed);
                self.handle_failure(batch).await;
            }
        }
    }

    /// Reschedule a failed batch with exponential backoff. Events that have
    /// used up their attempts move to offline storage, or are dropped when
    /// there is none.
    async fn handle_failure(&mut self, batch: Vec<QueuedEvent>) {
        let now = Instant::now();
        let mut exhausted = Vec::new();
        for mut event in batch {
            event.retry_count += 1;
            if event.retry_count < self.config.max_retries {
                let delay = backoff_delay(
                    self.config.retry_delay,
                    event.retry_count,
                    self.config.retry_jitter,
                );
                self.metrics.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                self.backlog.schedule(event, now + delay);
            } else {
                exhausted.push(event);
            }
        }
        if exhausted.is_empty() {
            return;
        }
        match &self.offline_store {
            Some(store) => {
                store.persist(&exhausted).await;
                self.metrics
                    .persisted
                    .fetch_add(exhausted.len() as u64, Ordering::Relaxed);
                tracing::warn!(
                    events = exhausted.len(),
                    "retries exhausted, events moved to offline storage"
                );
            }
            None => {
                self.metrics
                    .dropped_exhausted
                    .fetch_add(exhausted.len() as u64, Ordering::Relaxed);
                tracing::warn!(events = exhausted.len(), "retries exhausted, events dropped");
            }
        }
    }

    /// Pull persisted events back in with a fresh retry budget and schedule
    /// them as immediately due.
    async fn recover_offline_events(&mut self) {
        let Some(store) = &self.offline_store else {
            return;
        };
        let recovered = store.load_and_clear().await;
        if recovered.is_empty() {
            return;
        }
        self.metrics
            .recovered
            .fetch_add(recovered.len() as u64, Ordering::Relaxed);
        tracing::info!(events = recovered.len(), "recovered events from offline storage");
        let now = Instant::now();
        for mut event in recovered {
            event.retry_count = 0;
            self.backlog.schedule(event, now);
        }
    }

    /// Final confirmed-only flush, then persist whatever is still unsent.
    async fn shutdown(&mut self) {
        self.flush(FlushReason::Shutdown, SendMode::ConfirmedOnly).await;

        let mut leftover = self.queue.take_all();
        leftover.extend(self.backlog.drain());
        if leftover.is_empty() {
            return;
        }

        match &self.offline_store {
            Some(store) => {
                store.persist(&leftover).await;
                self.metrics
                    .persisted
                    .fetch_add(leftover.len() as u64, Ordering::Relaxed);
                tracing::info!(events = leftover.len(), "unsent events persisted at shutdown");
            }
            None => {
                self.metrics
                    .dropped_exhausted
                    .fetch_add(leftover.len() as u64, Ordering::Relaxed);
                tracing::warn!(events = leftover.len(), "unsent events dropped at shutdown");
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::store::MemoryKvStore;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use reqwest::Url;

    /// Always answers with a fixed status and never accepts quick sends.
    struct TestTransport {
        status: u16,
        confirmed_bodies: Mutex<Vec<Vec<u8>>>,
    }

    impl TestTransport {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                confirmed_bodies: Mutex::new(Vec::new()),
            })
        }

        fn confirmed_count(&self) -> usize {
            self.confirmed_bodies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl crate::transport::Transport for TestTransport {
        fn send_quick(&self, _url: &Url, _headers: &HeaderMap, _body: &[u8]) -> bool {
            false
        }

        async fn send_confirmed(
            &self,
            _url: &Url,
            _headers: &HeaderMap,
            body: Vec<u8>,
        ) -> crate::Result<()> {
            self.confirmed_bodies.lock().unwrap().push(body);
            if (200..300).contains(&self.status) {
                Ok(())
            } else {
                Err(Error::Collector {
                    status: self.status,
                    message: String::new(),
                })
            }
        }
    }

    fn event(message: &str) -> EventRecord {
        EventRecord::builder().level(Level::Info).message(message).build()
    }

    fn shipper(transport: Arc<TestTransport>) -> Shipper {
        Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport)
            .quick_send_limit_bytes(0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn flush_after_write_delivers_everything_written() {
        let transport = TestTransport::new(200);
        let shipper = shipper(transport.clone());

        shipper.write(event("one"));
        shipper.write(event("two"));
        shipper.write(event("three"));
        shipper.flush().await;

        let metrics = shipper.metrics();
        assert_eq!(metrics.enqueued, 3);
        assert_eq!(metrics.delivered, 3);
        assert_eq!(transport.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_sends_nothing() {
        let transport = TestTransport::new(200);
        let shipper = shipper(transport.clone());

        shipper.flush().await;
        shipper.flush().await;

        assert_eq!(transport.confirmed_count(), 0);
    }

    #[tokio::test]
    async fn rate_limiter_drops_excess_writes() {
        let transport = TestTransport::new(200);
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .rate_limit_per_minute(2)
            .build()
            .unwrap();

        for i in 0..5 {
            shipper.write(event(&format!("event {i}")));
        }
        shipper.flush().await;

        let metrics = shipper.metrics();
        assert_eq!(metrics.enqueued, 2);
        assert_eq!(metrics.rate_limited, 3);
        assert_eq!(metrics.delivered, 2);
    }

    #[tokio::test]
    async fn offline_defers_until_connectivity_returns() {
        let transport = TestTransport::new(200);
        let shipper = shipper(transport.clone());

        shipper.connectivity_lost().await;
        shipper.write(event("stuck"));
        shipper.flush().await;
        assert_eq!(transport.confirmed_count(), 0);

        shipper.connectivity_restored().await;
        shipper.flush().await;
        assert_eq!(transport.confirmed_count(), 1);
        assert_eq!(shipper.metrics().delivered, 1);
    }

    #[tokio::test]
    async fn signals_are_inert_when_lifecycle_handling_is_disabled() {
        let transport = TestTransport::new(200);
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .enable_lifecycle_handling(false)
            .build()
            .unwrap();

        // Ignored: a later flush must still deliver.
        shipper.connectivity_lost().await;
        shipper.write(event("still flows"));
        shipper.flush().await;

        assert_eq!(shipper.metrics().delivered, 1);
    }

    #[tokio::test]
    async fn close_flushes_remaining_events() {
        let transport = TestTransport::new(200);
        let shipper = shipper(transport.clone());

        shipper.write(event("last words"));
        shipper.close().await;

        assert_eq!(transport.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn full_intake_queue_drops_the_newest_events() {
        let transport = TestTransport::new(200);
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .max_queue_events(2)
            .build()
            .unwrap();

        // Park deliveries so the queue cannot drain between writes.
        shipper.connectivity_lost().await;
        for i in 0..5 {
            shipper.write(event(&format!("event {i}")));
        }
        // Sequences after the writes; delivers nothing while offline.
        shipper.flush().await;
        assert_eq!(shipper.metrics().dropped_queue_full, 3);

        shipper.connectivity_restored().await;
        assert_eq!(shipper.metrics().delivered, 2);
    }

    #[tokio::test]
    async fn close_persists_events_it_cannot_deliver() {
        let transport = TestTransport::new(200);
        let kv = Arc::new(MemoryKvStore::new());
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .enable_offline_storage(true)
            .offline_store(kv.clone())
            .offline_storage_key_prefix("unit")
            .build()
            .unwrap();

        let metrics = shipper.metrics.clone();
        shipper.connectivity_lost().await;
        shipper.write(event("trapped"));
        shipper.close().await;

        assert_eq!(transport.confirmed_count(), 0);
        assert_eq!(metrics.snapshot().persisted, 1);
        assert!(kv.get("unit:events").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exhausted_events_land_in_the_offline_store() {
        let transport = TestTransport::new(500);
        let kv = Arc::new(MemoryKvStore::new());
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .max_retries(0)
            .enable_offline_storage(true)
            .offline_store(kv.clone())
            .offline_storage_key_prefix("unit")
            .build()
            .unwrap();

        shipper.write(event("doomed"));
        shipper.flush().await;

        let metrics = shipper.metrics();
        assert_eq!(metrics.send_failures, 1);
        assert_eq!(metrics.persisted, 1);
        assert!(kv.get("unit:events").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_without_an_explicit_call() {
        let transport = TestTransport::new(200);
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .flush_interval(Duration::from_secs(5))
            .build()
            .unwrap();

        shipper.write(event("patience"));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(shipper.metrics().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_the_batch_count_triggers_a_flush() {
        let transport = TestTransport::new(200);
        let shipper = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .transport(transport.clone())
            .quick_send_limit_bytes(0)
            .max_batch_count(2)
            .flush_interval(Duration::from_secs(600))
            .build()
            .unwrap();

        shipper.write(event("one"));
        shipper.write(event("two"));
        // Give the worker a beat; paused time advances only when idle.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(shipper.metrics().delivered, 2);
        assert_eq!(transport.confirmed_count(), 1);
    }

    #[tokio::test]
    async fn builder_rejects_degenerate_configuration() {
        assert!(Shipper::builder()
            .endpoint("ftp://nope")
            .build()
            .is_err());
        assert!(Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .flush_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .auth_token("secret-token\n")
            .build()
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unusable_default_offline_directory_fails_construction() {
        // `logship` as a file blocks the default store directory.
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("logship"), "occupied").unwrap();
        let previous = std::env::var_os("TMPDIR");
        std::env::set_var("TMPDIR", tmp.path());

        let result = Shipper::builder()
            .endpoint("http://127.0.0.1:9/v1/events")
            .enable_offline_storage(true)
            .build();

        match previous {
            Some(value) => std::env::set_var("TMPDIR", value),
            None => std::env::remove_var("TMPDIR"),
        }
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
