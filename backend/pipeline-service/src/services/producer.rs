use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::clients::{EventCache, EventPublisher, PublishAck};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::models::{event_key, Event, ServiceName, Status};

/// Raw events stay readable through `get_event` for ten minutes
pub const RAW_EVENT_TTL: Duration = Duration::from_secs(10 * 60);

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub event_id: String,
    pub ack: PublishAck,
    /// `Bad` when the best-effort cache write failed
    pub cache_status: Status,
    pub duration: Duration,
}

/// Publishes events to the broker and caches them for lookup
pub struct EventProducer {
    publisher: Arc<dyn EventPublisher>,
    cache: Arc<dyn EventCache>,
    metrics: Arc<dyn PipelineMetrics>,
    topic: String,
}

impl EventProducer {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        cache: Arc<dyn EventCache>,
        metrics: Arc<dyn PipelineMetrics>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            cache,
            metrics,
            topic: topic.into(),
        }
    }

    /// Publish `event` keyed by its id, then cache it under `event:<id>`.
    ///
    /// A publish failure fails the call before anything is cached. A cache
    /// failure only degrades `cache_status` in the receipt.
    pub async fn send_event(&self, event: &Event) -> PipelineResult<SendReceipt> {
        if event.id().is_empty() {
            return Err(PipelineError::Validation(
                "event id must be assigned before publishing".to_string(),
            ));
        }

        let start = Instant::now();
        let encoded = serde_json::to_string(event)
            .map_err(|e| PipelineError::Internal(format!("failed to encode event: {}", e)))?;

        let ack = match self
            .publisher
            .publish(&self.topic, event.id(), encoded.as_bytes())
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                error!(
                    event_id = %event.id(),
                    topic = %self.topic,
                    error = %e,
                    "Failed to publish event"
                );
                self.metrics.broker_message(&self.topic, Status::Bad);
                self.metrics.broker_message_duration(&self.topic, start.elapsed());
                self.metrics
                    .event_processed(event.event_type, ServiceName::Producer, Status::Bad);
                return Err(PipelineError::BrokerUnavailable(e));
            }
        };
        self.metrics.broker_message(&self.topic, Status::Ok);

        let key = event_key(event.id());
        let cache_status = match self.cache.set(&key, &encoded, RAW_EVENT_TTL).await {
            Ok(()) => Status::Ok,
            Err(e) => {
                warn!(event_id = %event.id(), key = %key, error = %e, "Failed to cache event");
                Status::Bad
            }
        };
        self.metrics.cache_operation("set", cache_status);

        let duration = start.elapsed();
        self.metrics.broker_message_duration(&self.topic, duration);
        self.metrics
            .event_processed(event.event_type, ServiceName::Producer, Status::Ok);

        info!(
            event_id = %event.id(),
            event_type = %event.event_type,
            partition = ack.partition,
            offset = ack.offset,
            cache_status = %cache_status,
            duration_ms = duration.as_millis() as u64,
            "Event published"
        );

        Ok(SendReceipt {
            event_id: event.id().to_string(),
            ack,
            cache_status,
            duration,
        })
    }

    /// Read a raw event back from the cache; no store fallback
    pub async fn get_event(&self, id: &str) -> PipelineResult<Event> {
        let key = event_key(id);
        let cached = self.cache.get(&key).await;
        self.metrics.cache_operation("get", Status::of(&cached));

        let raw = cached?.ok_or_else(|| PipelineError::NotFound(format!("event {} not found", id)))?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Internal(format!("cached event {} is corrupt: {}", id, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventData, EventSource, EventType};
    use crate::test_support::{InMemoryCache, RecordingMetrics, RecordingPublisher};
    use serde_json::json;

    struct Fixture {
        producer: EventProducer,
        publisher: Arc<RecordingPublisher>,
        cache: Arc<InMemoryCache>,
        metrics: Arc<RecordingMetrics>,
    }

    fn fixture() -> Fixture {
        let publisher = RecordingPublisher::new();
        let cache = InMemoryCache::new();
        let metrics = RecordingMetrics::new();
        let producer = EventProducer::new(
            publisher.clone(),
            cache.clone(),
            metrics.clone(),
            "user-events",
        );
        Fixture {
            producer,
            publisher,
            cache,
            metrics,
        }
    }

    fn click_event() -> Event {
        let mut data = EventData::new();
        data.insert("action".into(), json!("click"));
        Event::with_id("e1", EventType::UserAction, "u1", EventSource::Producer, data)
    }

    #[tokio::test]
    async fn test_send_then_get_returns_identical_event() {
        let f = fixture();
        let event = click_event();

        let receipt = f.producer.send_event(&event).await.unwrap();
        assert_eq!(receipt.event_id, "e1");
        assert_eq!(receipt.cache_status, Status::Ok);

        let fetched = f.producer.get_event("e1").await.unwrap();
        assert_eq!(fetched, event);
    }

    #[tokio::test]
    async fn test_publish_is_keyed_by_event_id() {
        let f = fixture();
        f.producer.send_event(&click_event()).await.unwrap();

        let published = f.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "user-events");
        assert_eq!(published[0].key, "e1");

        let on_wire: Event = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(on_wire, click_event());
    }

    #[tokio::test]
    async fn test_cache_down_still_publishes() {
        let f = fixture();
        f.cache.set_failing(true);

        let receipt = f.producer.send_event(&click_event()).await.unwrap();
        assert_eq!(receipt.cache_status, Status::Bad);
        assert_eq!(f.publisher.published().len(), 1);
        assert_eq!(
            f.metrics.cache.lock().unwrap().as_slice(),
            &[("set".to_string(), Status::Bad)]
        );

        f.cache.set_failing(false);
        let err = f.producer.get_event("e1").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_skips_cache() {
        let f = fixture();
        f.publisher.set_failing(true);

        let err = f.producer.send_event(&click_event()).await.unwrap_err();
        assert!(matches!(err, PipelineError::BrokerUnavailable(_)));
        assert!(f.cache.raw("event:e1").is_none());
        assert!(f.metrics.cache.lock().unwrap().is_empty());
        assert_eq!(
            f.metrics.events.lock().unwrap().as_slice(),
            &[(EventType::UserAction, ServiceName::Producer, Status::Bad)]
        );
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected() {
        let f = fixture();
        let event = Event::with_id("", EventType::Other, "u1", EventSource::Producer, EventData::new());

        let err = f.producer.send_event(&event).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_event_expires_after_ttl() {
        let f = fixture();
        f.producer.send_event(&click_event()).await.unwrap();

        tokio::time::advance(RAW_EVENT_TTL - Duration::from_secs(1)).await;
        assert!(f.producer.get_event("e1").await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            f.producer.get_event("e1").await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_event_surfaces_cache_outage() {
        let f = fixture();
        f.cache.set_failing(true);

        let err = f.producer.get_event("e1").await.unwrap_err();
        assert!(matches!(err, PipelineError::CacheUnavailable(_)));
    }
}
