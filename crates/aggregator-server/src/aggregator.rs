//! The aggregator facade: owns the queue, the consumer task and the stats
//! cache, and is the only thing the transport layer talks to.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aggregator_store::{DedupStore, StoreError};
use aggregator_types::{Event, StatsSnapshot};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::consumer::{BatchingConsumer, ConsumerState};
use crate::queue::{ingestion_queue, IngestionQueue};
use crate::stats::StatsCache;

/// Runtime tunables for the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Maximum number of events buffered between producers and the consumer.
    pub queue_capacity: usize,
    /// Maximum number of events admitted per store transaction.
    pub batch_limit: usize,
    /// Pause after a batch is lost to a durability failure.
    pub failure_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_limit: 100,
            failure_backoff: Duration::from_secs(1),
        }
    }
}

/// Errors surfaced by the aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The store schema could not be created or the durable count could not
    /// be read. The consumer was not started.
    #[error("aggregator initialization failed: {0}")]
    Initialization(#[from] StoreError),

    /// The blocking initialization task did not complete.
    #[error("aggregator initialization task failed: {0}")]
    InitializationTask(#[from] tokio::task::JoinError),

    /// The consumer has stopped and no longer accepts events.
    #[error("aggregator is shut down")]
    Closed,
}

/// Entry point for producers and readers.
///
/// Construct with [`Aggregator::initialize`], tear down with
/// [`Aggregator::shutdown`].
pub struct Aggregator {
    queue: IngestionQueue,
    cache: Arc<StatsCache>,
    store: DedupStore,
    stop: watch::Sender<bool>,
    consumer_state: watch::Receiver<ConsumerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("pending", &self.queue.pending())
            .field("consumer_state", &*self.consumer_state.borrow())
            .finish()
    }
}

impl Aggregator {
    /// Ensures the store schema, seeds `unique_events` from the durable
    /// record count, resets the session counters and starts the consumer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Initialization` if the schema cannot be
    /// created or the record count cannot be read. Nothing is started in
    /// that case.
    pub async fn initialize(
        store: DedupStore,
        settings: PipelineSettings,
    ) -> Result<Self, AggregatorError> {
        let init_store = store.clone();
        let durable_unique = tokio::task::spawn_blocking(move || {
            init_store.ensure_initialized()?;
            init_store.initial_unique_count()
        })
        .await??;

        let cache = Arc::new(StatsCache::new());
        cache.reset_session(durable_unique);

        let (queue, receiver) = ingestion_queue(settings.queue_capacity);
        let (stop, stop_rx) = watch::channel(false);
        let (consumer, consumer_state) = BatchingConsumer::new(
            receiver,
            store.clone(),
            cache.clone(),
            settings.batch_limit,
            settings.failure_backoff,
            stop_rx,
        );
        let worker = tokio::spawn(consumer.run());

        tracing::info!(
            durable_unique,
            queue_capacity = queue.capacity(),
            batch_limit = settings.batch_limit,
            "aggregator initialized"
        );

        Ok(Self {
            queue,
            cache,
            store,
            stop,
            consumer_state,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Signals the consumer to stop and waits for it.
    ///
    /// A batch that is already committing finishes first; events still
    /// buffered in the queue are abandoned. Calling this more than once, or
    /// from several tasks at once, is harmless; every caller returns only
    /// after the consumer has stopped.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match worker {
            Some(worker) => {
                if let Err(e) = worker.await {
                    tracing::error!(error = %e, "consumer task ended abnormally");
                }
                tracing::info!(abandoned = self.queue.pending(), "aggregator shut down");
            }
            None => {
                // Another caller owns the join handle; wait for the same end state.
                let mut state = self.consumer_state.clone();
                let _ = state.wait_for(|s| *s == ConsumerState::Stopped).await;
            }
        }
    }

    /// Queues one event for processing, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Closed` after shutdown.
    pub async fn enqueue_one(&self, event: Event) -> Result<(), AggregatorError> {
        self.queue
            .enqueue(event)
            .await
            .map_err(|_| AggregatorError::Closed)
    }

    /// Queues events in order and returns how many were queued.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Closed` after shutdown; events before the
    /// failing one stay queued.
    pub async fn enqueue_many(&self, events: Vec<Event>) -> Result<usize, AggregatorError> {
        let count = events.len();
        for event in events {
            self.enqueue_one(event).await?;
        }
        Ok(count)
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.cache.snapshot()
    }

    /// Accepted events for `topic`, or all accepted events when `None`.
    pub fn events(&self, topic: Option<&str>) -> Vec<Event> {
        self.cache.events_for_topic(topic)
    }

    /// Current consumer state.
    pub fn consumer_state(&self) -> ConsumerState {
        *self.consumer_state.borrow()
    }

    /// Events enqueued but not yet processed by the consumer.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Waits until every queued event has been processed, or until the
    /// consumer has stopped.
    pub async fn wait_until_drained(&self) {
        let mut state = self.consumer_state.clone();
        let stopped = async move {
            let _ = state.wait_for(|s| *s == ConsumerState::Stopped).await;
        };
        tokio::select! {
            () = self.queue.wait_until_drained() => {}
            () = stopped => {}
        }
    }

    /// The dedup store backing this aggregator.
    pub fn store(&self) -> &DedupStore {
        &self.store
    }
}
