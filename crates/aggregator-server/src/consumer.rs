//! The batching consumer: the only reader of the ingestion queue and the
//! only writer to the dedup store.
//!
//! Each cycle blocks for one event, opportunistically drains up to
//! `batch_limit - 1` more without waiting, admits the batch in a single
//! store transaction on the blocking pool, then records the outcome in the
//! stats cache. The stop signal is only observed while idle or while backing
//! off after a failure; a batch that has started committing always finishes.

use std::sync::Arc;
use std::time::Duration;

use aggregator_store::DedupStore;
use aggregator_types::Event;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::queue::QueueReceiver;
use crate::stats::StatsCache;

/// Lifecycle state of the batching consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Waiting for the first event of the next batch.
    Idle,
    /// Draining buffered events into the current batch.
    Batching,
    /// Submitting the batch to the store and updating stats.
    Committing,
    /// Stopped; no further batches will be processed.
    Stopped,
}

/// Single long-lived task draining the ingestion queue.
pub struct BatchingConsumer {
    receiver: QueueReceiver,
    store: DedupStore,
    cache: Arc<StatsCache>,
    batch_limit: usize,
    failure_backoff: Duration,
    stop: watch::Receiver<bool>,
    state: watch::Sender<ConsumerState>,
}

impl BatchingConsumer {
    /// Builds a consumer and returns it together with a handle for watching
    /// its state.
    pub fn new(
        receiver: QueueReceiver,
        store: DedupStore,
        cache: Arc<StatsCache>,
        batch_limit: usize,
        failure_backoff: Duration,
        stop: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<ConsumerState>) {
        let (state, state_rx) = watch::channel(ConsumerState::Idle);
        let consumer = Self {
            receiver,
            store,
            cache,
            batch_limit: batch_limit.max(1),
            failure_backoff,
            stop,
            state,
        };
        (consumer, state_rx)
    }

    /// Runs until the stop signal fires or every producer handle is gone.
    ///
    /// Durability failures never end the loop: the batch is logged and
    /// dropped, and the consumer pauses for `failure_backoff` before
    /// continuing.
    pub async fn run(mut self) {
        tracing::info!(
            batch_limit = self.batch_limit,
            failure_backoff_ms = self.failure_backoff.as_millis() as u64,
            "batching consumer started"
        );

        loop {
            self.set_state(ConsumerState::Idle);

            let first = tokio::select! {
                biased;
                () = stop_requested(&mut self.stop) => break,
                next = self.receiver.dequeue_blocking() => match next {
                    Some(event) => event,
                    None => {
                        tracing::info!("ingestion queue closed, consumer exiting");
                        break;
                    }
                },
            };

            self.set_state(ConsumerState::Batching);
            let batch = self.fill_batch(first);

            self.set_state(ConsumerState::Committing);
            if !self.commit(batch).await {
                tokio::select! {
                    biased;
                    () = stop_requested(&mut self.stop) => break,
                    () = sleep(self.failure_backoff) => {}
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        tracing::info!("batching consumer stopped");
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    fn fill_batch(&mut self, first: Event) -> Vec<Event> {
        let mut batch = Vec::with_capacity(self.batch_limit);
        batch.push(first);
        while batch.len() < self.batch_limit {
            match self.receiver.dequeue_nonblocking_or_empty() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }

    /// Admits one batch and records the outcome. Returns `false` if the
    /// batch was lost to a durability failure.
    async fn commit(&self, batch: Vec<Event>) -> bool {
        let total = batch.len();
        let store = self.store.clone();

        let result = tokio::task::spawn_blocking(move || store.admit_batch(&batch)).await;

        let committed = match result {
            Ok(Ok(accepted)) => {
                let new = accepted.len();
                self.cache.record_batch_result(total, accepted);
                tracing::debug!(
                    batch_size = total,
                    accepted = new,
                    duplicates = total - new,
                    "committed batch"
                );
                true
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, batch_size = total, "failed to admit batch, dropping it");
                false
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    batch_size = total,
                    "batch admission task panicked or was cancelled, dropping batch"
                );
                false
            }
        };

        // Drained items are processed whether or not the store took them.
        self.receiver.mark_processed(total);
        committed
    }
}

/// Resolves once the stop flag is set or its sender is dropped.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
