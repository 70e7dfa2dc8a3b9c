//! HTTP handlers for publishing events and reading aggregator state.
//!
//! Provides:
//! - `POST /publish`: enqueue one event or `{"events": [...]}`
//! - `GET /events`: accepted events, optionally filtered by `topic`
//! - `GET /stats`: counters plus process start time

use crate::aggregator::AggregatorError;
use crate::AppState;
use aggregator_types::{Event, StatsSnapshot};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of `POST /publish`: either a batch wrapper or a bare event.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PublishRequest {
    /// `{"events": [...]}`
    Batch {
        /// Events to enqueue, in order.
        events: Vec<Event>,
    },
    /// A single event object.
    Single(Event),
}

/// Response for `POST /publish`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Always `"accepted"`; processing happens asynchronously.
    pub status: String,
    /// Number of events placed on the queue.
    pub queued_count: usize,
}

/// Handler for `POST /publish`.
///
/// Replies `202 Accepted` as soon as the events are queued, before they are
/// deduplicated. Waits while the queue is full.
pub async fn publish_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), Response> {
    let queued = match body {
        PublishRequest::Batch { events } => state.aggregator.enqueue_many(events).await,
        PublishRequest::Single(event) => state.aggregator.enqueue_one(event).await.map(|()| 1),
    }
    .map_err(|e| match e {
        AggregatorError::Closed => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        other => {
            tracing::error!(error = %other, "unexpected publish failure");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    })?;

    tracing::debug!(queued, "events queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            status: "accepted".to_string(),
            queued_count: queued,
        }),
    ))
}

/// Query parameters for `GET /events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only return events for this topic. Empty means all topics.
    pub topic: Option<String>,
}

/// Handler for `GET /events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Json<Vec<Event>> {
    let topic = params.topic.as_deref().filter(|t| !t.is_empty());
    Json(state.aggregator.events(topic))
}

/// Response for `GET /stats`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Aggregator counters.
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// When this process started.
    pub start_time: DateTime<Utc>,
}

/// Handler for `GET /stats`.
pub async fn get_stats_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.aggregator.stats(),
        start_time: state.started_at,
    })
}
