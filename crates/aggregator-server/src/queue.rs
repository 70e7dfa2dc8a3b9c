//! Bounded ingestion queue between producers and the batching consumer.
//!
//! Built on a bounded `tokio::sync::mpsc` channel: a full channel suspends
//! the producer until the consumer makes room. Alongside the channel a
//! pending counter tracks items that were enqueued but not yet marked
//! processed, so callers can wait for the pipeline to drain.

use std::sync::Arc;

use aggregator_types::Event;
use tokio::sync::{mpsc, watch};

/// Returned when the consumer side of the queue no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ingestion queue is closed")]
pub struct QueueClosed;

/// Producer half of the ingestion queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IngestionQueue {
    tx: mpsc::Sender<Event>,
    pending: Arc<watch::Sender<usize>>,
}

/// Consumer half of the ingestion queue. There is exactly one.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Event>,
    pending: Arc<watch::Sender<usize>>,
}

/// Creates a queue holding at most `capacity` items (minimum 1).
pub fn ingestion_queue(capacity: usize) -> (IngestionQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (pending, _) = watch::channel(0usize);
    let pending = Arc::new(pending);

    (
        IngestionQueue {
            tx,
            pending: pending.clone(),
        },
        QueueReceiver { rx, pending },
    )
}

impl IngestionQueue {
    /// Appends an event, waiting for space if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` if the receiver has been dropped.
    pub async fn enqueue(&self, event: Event) -> Result<(), QueueClosed> {
        // Only the reservation awaits; a cancelled enqueue leaves no count.
        let permit = self.tx.reserve().await.map_err(|_| QueueClosed)?;
        // Counted before the consumer can see the item.
        self.pending.send_modify(|n| *n += 1);
        permit.send(event);
        Ok(())
    }

    /// Items enqueued and not yet marked processed.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Waits until every enqueued item has been marked processed.
    ///
    /// Returns immediately when nothing is pending.
    pub async fn wait_until_drained(&self) {
        let mut rx = self.pending.subscribe();
        // The sender half lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl QueueReceiver {
    /// Waits for the next item. Returns `None` once every producer is gone
    /// and the buffer is empty.
    pub async fn dequeue_blocking(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns the next item if one is buffered, without waiting.
    pub fn dequeue_nonblocking_or_empty(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Marks `count` previously dequeued items as processed.
    pub fn mark_processed(&self, count: usize) {
        self.pending.send_modify(|n| *n = n.saturating_sub(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(id: &str) -> Event {
        Event::new("t", id, "ts", "queue-test")
    }

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let (queue, mut rx) = ingestion_queue(8);
        for id in ["a", "b", "c"] {
            queue.enqueue(event(id)).await.expect("enqueue");
        }

        let first = rx.dequeue_blocking().await.expect("item");
        let second = rx.dequeue_nonblocking_or_empty().expect("item");
        let third = rx.dequeue_nonblocking_or_empty().expect("item");

        assert_eq!(
            [first.event_id, second.event_id, third.event_id],
            ["a", "b", "c"]
        );
        assert!(rx.dequeue_nonblocking_or_empty().is_none());
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let (queue, mut rx) = ingestion_queue(2);
        queue.enqueue(event("a")).await.expect("enqueue");
        queue.enqueue(event("b")).await.expect("enqueue");

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.enqueue(event("c"))).await;
        assert!(blocked.is_err(), "third enqueue should wait for space");

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(event("c")).await })
        };

        rx.dequeue_blocking().await.expect("item");
        tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("producer should resume once space frees")
            .expect("producer task should not panic")
            .expect("enqueue should succeed");
    }

    #[tokio::test]
    async fn pending_tracks_processed_items() {
        let (queue, mut rx) = ingestion_queue(8);
        queue.enqueue(event("a")).await.expect("enqueue");
        queue.enqueue(event("b")).await.expect("enqueue");
        assert_eq!(queue.pending(), 2);

        rx.dequeue_blocking().await.expect("item");
        rx.dequeue_blocking().await.expect("item");
        assert_eq!(queue.pending(), 2, "dequeued items are still pending");

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_until_drained().await })
        };
        rx.mark_processed(2);

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("drain wait should finish")
            .expect("waiter should not panic");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn enqueue_fails_after_receiver_dropped() {
        let (queue, rx) = ingestion_queue(4);
        drop(rx);

        assert_eq!(queue.enqueue(event("a")).await, Err(QueueClosed));
        assert_eq!(queue.pending(), 0, "failed enqueue must not stay pending");
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (queue, _rx) = ingestion_queue(0);
        assert_eq!(queue.capacity(), 1);
    }
}
