//! Shared data model for the event aggregator.
//!
//! These types cross every crate boundary in the workspace: the transport
//! deserialises [`Event`]s, the dedup store keys them by [`EventKey`], and the
//! stats cache reports a [`StatsSnapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque JSON object carried alongside an event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A single event notification published by a producer.
///
/// Identity is the `(topic, event_id)` pair; the remaining fields are carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Logical stream the event belongs to.
    pub topic: String,
    /// Producer-assigned identifier, unique within the topic.
    pub event_id: String,
    /// Producer-supplied timestamp string. Not interpreted.
    pub timestamp: String,
    /// Name of the producing system.
    pub source: String,
    /// Arbitrary event body.
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    /// Builds an event with an empty payload.
    pub fn new(
        topic: impl Into<String>,
        event_id: impl Into<String>,
        timestamp: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
            timestamp: timestamp.into(),
            source: source.into(),
            payload: Payload::new(),
        }
    }

    /// Returns the dedup key, or `None` if either key attribute is missing.
    ///
    /// An empty string counts as missing.
    pub fn key(&self) -> Option<EventKey> {
        if self.topic.is_empty() || self.event_id.is_empty() {
            return None;
        }
        Some(EventKey {
            topic: self.topic.clone(),
            event_id: self.event_id.clone(),
        })
    }
}

/// The `(topic, event_id)` pair that identifies a logical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    /// Topic half of the key.
    pub topic: String,
    /// Event id half of the key.
    pub event_id: String,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

/// Point-in-time copy of the aggregator's counters.
///
/// `received_events` and `duplicates` cover the current process only;
/// `unique_events` is seeded from the durable record count at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Events drained from the queue and submitted to the store this session.
    pub received_events: u64,
    /// Distinct keys ever admitted (durable seed plus this session).
    pub unique_events: u64,
    /// Submitted events that were not admitted this session.
    pub duplicates: u64,
    /// When the last batch with at least one admitted event was recorded.
    pub last_updated: Option<DateTime<Utc>>,
    /// Number of topics with at least one event admitted this session.
    pub unique_topics: usize,
}
