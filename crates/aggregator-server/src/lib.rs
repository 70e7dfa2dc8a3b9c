//! Event aggregator server library logic.
//!
//! Producers publish events over HTTP; they are queued, drained in batches
//! by a single consumer, checked against the durable dedup store, and
//! reflected in the in-memory stats and topic index.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod consumer;
pub mod queue;
pub mod stats;

pub use aggregator::{Aggregator, AggregatorError, PipelineSettings};
pub use consumer::ConsumerState;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The ingestion pipeline.
    pub aggregator: Arc<Aggregator>,
    /// Process start time, reported by `/stats`.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wraps an aggregator, stamping the current time as the start time.
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            started_at: Utc::now(),
        }
    }
}

/// Maximum request body size (8 MiB); large enough for a few thousand
/// events per batch publish.
const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publish", post(api::publish_handler))
        .route("/events", get(api::get_events_handler))
        .route("/stats", get(api::get_stats_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
