//! In-memory implementations of the client traits for unit tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::Instant as TokioInstant;

use crate::clients::{
    BrokerMessage, BrokerResult, CacheResult, EventCache, EventPublisher, HealthProbe,
    MessageSubscription, PublishAck, StoreResult, TransactionStore,
};
use crate::error::{BrokerError, CacheError, ProbeError, StoreError};
use crate::metrics::PipelineMetrics;
use crate::models::{
    EventType, NewTransaction, ServiceName, ServiceStats, Status, Transaction, TransactionStats,
};

/// TTL cache on tokio's clock so tests can `advance` past expiry
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, TokioInstant)>>,
    failing: AtomicBool,
    stalled: AtomicBool,
    stall_reached: Notify,
}

impl InMemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes hang forever once set, like a Redis server that stopped answering
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Resolves once a write is stuck on the stall
    pub async fn stall_reached(&self) {
        self.stall_reached.notified().await;
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|(_, expires)| *expires > TokioInstant::now())
            .map(|(value, _)| value.clone())
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventCache for InMemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check()?;
        if self.stalled.load(Ordering::SeqCst) {
            self.stall_reached.notify_one();
            futures::future::pending::<()>().await;
        }
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (value.to_string(), TokioInstant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.raw(key).is_some())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<PublishAck> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("all brokers down".into()));
        }

        let mut published = self.published.lock().unwrap();
        published.push(Published {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(PublishAck {
            partition: 0,
            offset: published.len() as i64 - 1,
        })
    }
}

/// Transaction log with the same ordering and windowing rules as PostgreSQL
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<Vec<Transaction>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Transaction> {
        self.rows.lock().unwrap().clone()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64> {
        self.check()?;
        if tx.duration_ms < 0 {
            return Err(StoreError::InvalidRow("duration_ms must be >= 0".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        self.rows.lock().unwrap().push(Transaction {
            id,
            timestamp: tx.timestamp,
            broker_status: tx.broker_status,
            cache_status: tx.cache_status,
            duration_ms: tx.duration_ms,
            service: tx.service,
            event_id: tx.event_id.clone(),
            error_msg: tx.error_msg.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn list_recent(&self, limit: i64) -> StoreResult<Vec<Transaction>> {
        self.check()?;
        let mut rows = self.rows();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn aggregate_stats(&self, window: Duration) -> StoreResult<TransactionStats> {
        self.check()?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window)
                .map_err(|e| StoreError::InvalidRow(e.to_string()))?;

        let mut stats = TransactionStats::new();
        let mut durations: HashMap<String, i64> = HashMap::new();
        for row in self.rows().iter().filter(|r| r.timestamp > cutoff) {
            let entry = stats
                .entry(row.service.to_string())
                .or_insert_with(ServiceStats::default);
            entry.total_transactions += 1;
            match row.broker_status {
                Status::Ok => entry.broker_ok += 1,
                Status::Bad => entry.broker_bad += 1,
            }
            match row.cache_status {
                Status::Ok => entry.cache_ok += 1,
                Status::Bad => entry.cache_bad += 1,
            }
            *durations.entry(row.service.to_string()).or_default() += row.duration_ms;
        }
        for (service, entry) in stats.iter_mut() {
            entry.avg_duration_ms =
                durations[service] as f64 / entry.total_transactions as f64;
        }

        Ok(stats)
    }
}

/// Probe whose outcome and latency are set by the test
pub struct StaticProbe {
    name: &'static str,
    healthy: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn healthy(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            healthy: AtomicBool::new(true),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} down", self.name)).into())
        }
    }
}

/// Handles shared with a [`ScriptedSubscription`] after it moves into a task
#[derive(Clone, Default)]
pub struct SubscriptionLog {
    pub committed: Arc<Mutex<Vec<i64>>>,
    pub left: Arc<AtomicBool>,
}

impl SubscriptionLog {
    pub fn committed(&self) -> Vec<i64> {
        self.committed.lock().unwrap().clone()
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

/// Delivers queued messages, then blocks forever like an idle topic
pub struct ScriptedSubscription {
    queue: VecDeque<BrokerResult<BrokerMessage>>,
    log: SubscriptionLog,
}

impl ScriptedSubscription {
    pub fn new(messages: Vec<BrokerResult<BrokerMessage>>) -> (Self, SubscriptionLog) {
        let log = SubscriptionLog::default();
        (
            Self {
                queue: messages.into(),
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl MessageSubscription for ScriptedSubscription {
    async fn recv(&mut self) -> BrokerResult<BrokerMessage> {
        match self.queue.pop_front() {
            Some(next) => next,
            None => futures::future::pending::<BrokerResult<BrokerMessage>>().await,
        }
    }

    async fn commit(&mut self, message: &BrokerMessage) -> BrokerResult<()> {
        self.log.committed.lock().unwrap().push(message.offset);
        Ok(())
    }

    async fn leave(&mut self) -> BrokerResult<()> {
        self.log.left.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn message(offset: i64, payload: &[u8]) -> BrokerMessage {
    BrokerMessage {
        topic: "user-events".to_string(),
        partition: 0,
        offset,
        key: None,
        payload: payload.to_vec(),
        received_at: Instant::now(),
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub broker: Mutex<Vec<(String, Status)>>,
    pub durations: AtomicUsize,
    pub cache: Mutex<Vec<(String, Status)>>,
    pub events: Mutex<Vec<(EventType, ServiceName, Status)>>,
    pub transactions: Mutex<Vec<(ServiceName, Status, Status)>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PipelineMetrics for RecordingMetrics {
    fn broker_message(&self, topic: &str, status: Status) {
        self.broker.lock().unwrap().push((topic.to_string(), status));
    }

    fn broker_message_duration(&self, _topic: &str, _elapsed: Duration) {
        self.durations.fetch_add(1, Ordering::SeqCst);
    }

    fn cache_operation(&self, operation: &str, status: Status) {
        self.cache.lock().unwrap().push((operation.to_string(), status));
    }

    fn event_processed(&self, event_type: EventType, service: ServiceName, status: Status) {
        self.events.lock().unwrap().push((event_type, service, status));
    }

    fn transaction_recorded(&self, service: ServiceName, broker_status: Status, cache_status: Status) {
        self.transactions
            .lock()
            .unwrap()
            .push((service, broker_status, cache_status));
    }

    fn http_request(&self, _method: &str, _path: &str, _status: u16, _elapsed: Duration) {}
}
