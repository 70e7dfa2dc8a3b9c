//! In-memory statistics and per-topic index of accepted events.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use aggregator_types::{Event, StatsSnapshot};
use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
struct CacheState {
    received_events: u64,
    unique_events: u64,
    duplicates: u64,
    last_updated: Option<DateTime<Utc>>,
    topics: HashMap<String, Vec<Event>>,
    /// Topic names in the order each was first accepted.
    topic_order: Vec<String>,
}

/// Counters and topic index behind a single lock.
///
/// Uses `std::sync::Mutex`: every critical section is a short in-memory
/// update that never spans an `.await` or any I/O.
#[derive(Debug, Default)]
pub struct StatsCache {
    state: Mutex<CacheState>,
}

impl StatsCache {
    /// Creates an empty cache with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Counters are plain integers; a panicked writer cannot leave
                // them structurally invalid.
                tracing::error!("stats cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Starts a new session: `unique_events` is seeded from the durable
    /// count, the session counters go back to zero and the index is cleared.
    pub fn reset_session(&self, durable_unique: u64) {
        let mut state = self.lock();
        state.received_events = 0;
        state.duplicates = 0;
        state.unique_events = durable_unique;
        state.last_updated = None;
        state.topics.clear();
        state.topic_order.clear();
    }

    /// Applies the outcome of one committed batch.
    ///
    /// `total_in_batch` is every event drained for the batch, including ones
    /// skipped for a missing key; anything not in `accepted` counts as a
    /// duplicate.
    pub fn record_batch_result(&self, total_in_batch: usize, accepted: Vec<Event>) {
        let total = total_in_batch as u64;
        let new = accepted.len() as u64;

        let mut state = self.lock();
        state.received_events += total;
        state.unique_events += new;
        state.duplicates += total.saturating_sub(new);

        if !accepted.is_empty() {
            state.last_updated = Some(Utc::now());
            let CacheState {
                topics,
                topic_order,
                ..
            } = &mut *state;
            for event in accepted {
                topics
                    .entry(event.topic.clone())
                    .or_insert_with(|| {
                        topic_order.push(event.topic.clone());
                        Vec::new()
                    })
                    .push(event);
            }
        }
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.lock();
        StatsSnapshot {
            received_events: state.received_events,
            unique_events: state.unique_events,
            duplicates: state.duplicates,
            last_updated: state.last_updated,
            unique_topics: state.topics.len(),
        }
    }

    /// Copies the accepted events for `topic`, or for every topic when
    /// `None` (topics in first-accepted order, then acceptance order).
    pub fn events_for_topic(&self, topic: Option<&str>) -> Vec<Event> {
        let state = self.lock();
        match topic {
            Some(topic) => state.topics.get(topic).cloned().unwrap_or_default(),
            None => state
                .topic_order
                .iter()
                .filter_map(|name| state.topics.get(name))
                .flatten()
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str, id: &str) -> Event {
        Event::new(topic, id, "ts", "stats-test")
    }

    #[test]
    fn batch_result_updates_counters() {
        let cache = StatsCache::new();
        cache.record_batch_result(3, vec![event("t", "e1")]);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.received_events, 3);
        assert_eq!(snapshot.unique_events, 1);
        assert_eq!(snapshot.duplicates, 2);
        assert_eq!(snapshot.unique_topics, 1);
        assert!(snapshot.last_updated.is_some());
    }

    #[test]
    fn all_duplicate_batch_leaves_last_updated_alone() {
        let cache = StatsCache::new();
        cache.record_batch_result(2, Vec::new());

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.duplicates, 2);
        assert_eq!(snapshot.last_updated, None);
        assert_eq!(snapshot.unique_topics, 0);
    }

    #[test]
    fn reset_session_seeds_unique_and_clears_session_state() {
        let cache = StatsCache::new();
        cache.record_batch_result(4, vec![event("t", "e1"), event("t", "e2")]);

        cache.reset_session(42);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.received_events, 0);
        assert_eq!(snapshot.duplicates, 0);
        assert_eq!(snapshot.unique_events, 42);
        assert!(cache.events_for_topic(None).is_empty());
    }

    #[test]
    fn events_are_isolated_by_topic() {
        let cache = StatsCache::new();
        cache.record_batch_result(
            3,
            vec![event("a", "1"), event("b", "1"), event("a", "2")],
        );

        let a = cache.events_for_topic(Some("a"));
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| e.topic == "a"));
        assert_eq!(a[0].event_id, "1");
        assert_eq!(a[1].event_id, "2");

        assert!(cache.events_for_topic(Some("missing")).is_empty());
        assert_eq!(cache.events_for_topic(None).len(), 3);
    }

    #[test]
    fn all_events_follow_first_accepted_topic_order() {
        let cache = StatsCache::new();
        cache.record_batch_result(1, vec![event("z", "1")]);
        cache.record_batch_result(2, vec![event("a", "1"), event("z", "2")]);

        let order: Vec<(String, String)> = cache
            .events_for_topic(None)
            .into_iter()
            .map(|e| (e.topic, e.event_id))
            .collect();
        assert_eq!(
            order,
            vec![
                ("z".to_string(), "1".to_string()),
                ("z".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ]
        );

        cache.reset_session(0);
        cache.record_batch_result(1, vec![event("a", "2")]);
        let topics: Vec<String> = cache
            .events_for_topic(None)
            .into_iter()
            .map(|e| e.topic)
            .collect();
        assert_eq!(topics, vec!["a"]);
    }

    #[test]
    fn returned_events_are_copies() {
        let cache = StatsCache::new();
        cache.record_batch_result(1, vec![event("a", "1")]);

        let mut copy = cache.events_for_topic(Some("a"));
        copy.clear();

        assert_eq!(cache.events_for_topic(Some("a")).len(), 1);
    }
}
