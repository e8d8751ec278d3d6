//! Domain events carried through the broker and cached by producer/consumer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Free-form attributes attached to an event. Keys are unique; values are
/// kept as self-describing JSON so nested structures survive the round trip.
pub type EventData = serde_json::Map<String, Value>;

/// Kind of event, used for per-type processing and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserAction,
    SystemMetric,
    BusinessEvent,
    Error,
    /// Any type name outside the known set
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserAction => "user_action",
            EventType::SystemMetric => "system_metric",
            EventType::BusinessEvent => "business_event",
            EventType::Error => "error",
            EventType::Other => "other",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that originated an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Producer,
    Consumer,
    Monitor,
    #[serde(alias = "api-gateway")]
    Gateway,
}

/// A domain event.
///
/// Wire format (JSON):
/// ```json
/// {
///   "id": "e1",
///   "type": "user_action",
///   "user_id": "u1",
///   "data": { "action": "click" },
///   "timestamp": "2024-01-01T00:00:00Z",
///   "source": "producer"
/// }
/// ```
///
/// The identifier cannot be changed once set; an empty identifier may be
/// filled exactly once through [`Event::assign_id_if_missing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub data: EventData,

    /// Creation time; defaults to the decode time when absent
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub source: EventSource,
}

/// Producers that encode nil maps and strings send `null`; read it as empty
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    /// Create an event with a generated UUID v4 identifier
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        source: EventSource,
        data: EventData,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), event_type, user_id, source, data)
    }

    /// Create an event with a caller-supplied identifier
    pub fn with_id(
        id: impl Into<String>,
        event_type: EventType,
        user_id: impl Into<String>,
        source: EventSource,
        data: EventData,
    ) -> Self {
        Self {
            id: id.into(),
            event_type,
            user_id: user_id.into(),
            data,
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Generate an identifier for events submitted without one.
    pub fn assign_id_if_missing(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        &self.id
    }

    /// Typed view of `data` for the known event shapes.
    ///
    /// Falls back to [`EventPayload::Generic`] for unknown types and for known
    /// types whose data does not match the expected shape.
    pub fn payload(&self) -> EventPayload {
        let object = || Value::Object(self.data.clone());
        let typed = match self.event_type {
            EventType::UserAction => serde_json::from_value(object())
                .map(EventPayload::UserAction)
                .ok(),
            EventType::SystemMetric => serde_json::from_value(object())
                .map(EventPayload::SystemMetric)
                .ok(),
            EventType::BusinessEvent => serde_json::from_value(object())
                .map(EventPayload::BusinessEvent)
                .ok(),
            EventType::Error | EventType::Other => None,
        };

        typed.unwrap_or_else(|| EventPayload::Generic(self.data.clone()))
    }
}

/// Shape-specific view of an event's data
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserAction(UserActionData),
    SystemMetric(SystemMetricData),
    BusinessEvent(BusinessEventData),
    Generic(EventData),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserActionData {
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: EventData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemMetricData {
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    #[serde(flatten)]
    pub extra: EventData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusinessEventData {
    /// Order identifiers arrive both as strings and as numbers
    pub order_id: Option<Value>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: EventData,
}

/// Outcome marker stored in the processed-event wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processed,
}

/// Cached record written by the consumer under `processed_event:<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event: Event,
    pub processed_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

impl ProcessedEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            processed_at: Utc::now(),
            status: ProcessingStatus::Processed,
        }
    }
}
