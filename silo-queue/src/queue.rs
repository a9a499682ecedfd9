//! Queue backends.

use crate::{Delivery, ProvisioningMessage, QueueError, QueueResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use silo_redis::RedisService;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Default Redis list holding provisioning requests.
pub const DEFAULT_QUEUE_KEY: &str = "tenant:provision:queue";

/// Durable FIFO of provisioning requests. Delivery is at-least-once.
#[async_trait]
pub trait ProvisioningQueue: Send + Sync {
    /// Append a message.
    async fn enqueue(&self, message: &ProvisioningMessage) -> QueueResult<()>;

    /// Pop the oldest payload, waiting up to `wait` for one to arrive.
    ///
    /// Returns `Ok(None)` when the wait elapses with the queue empty.
    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>>;

    /// Number of waiting payloads.
    async fn len(&self) -> QueueResult<u64>;
}

/// Redis list queue: `LPUSH` to enqueue, `BRPOP` to dequeue.
#[derive(Clone)]
pub struct RedisProvisioningQueue {
    redis: Arc<RedisService>,
    key: String,
}

impl RedisProvisioningQueue {
    pub fn new(redis: Arc<RedisService>, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl ProvisioningQueue for RedisProvisioningQueue {
    async fn enqueue(&self, message: &ProvisioningMessage) -> QueueResult<()> {
        let payload = message.to_json()?;
        let depth = self.redis.lpush(&self.key, payload).await?;
        debug!(
            key = %self.key,
            tenant_id = %message.tenant_id,
            depth,
            "Provisioning message enqueued"
        );
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>> {
        let payload: Option<String> = self.redis.brpop(&self.key, wait).await?;
        Ok(payload.map(Delivery::new))
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.redis.llen(&self.key).await?)
    }
}

/// In-process queue with the same FIFO and blocking semantics.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    failing_dequeues: AtomicUsize,
    reject_enqueue: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw payload, bypassing encoding.
    pub fn push_raw(&self, payload: impl Into<String>) {
        self.items.lock().push_front(payload.into());
        self.notify.notify_one();
    }

    /// Make the next `count` dequeues fail with a transport error.
    pub fn fail_next_dequeues(&self, count: usize) {
        self.failing_dequeues.store(count, Ordering::SeqCst);
    }

    /// Make enqueues fail until reset.
    pub fn reject_enqueues(&self, reject: bool) {
        self.reject_enqueue.store(reject, Ordering::SeqCst);
    }

    /// Snapshot of waiting payloads, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.items.lock().iter().rev().cloned().collect()
    }
}

#[async_trait]
impl ProvisioningQueue for MemoryQueue {
    async fn enqueue(&self, message: &ProvisioningMessage) -> QueueResult<()> {
        if self.reject_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("enqueue rejected".into()));
        }
        self.push_raw(message.to_json()?);
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<Delivery>> {
        if self
            .failing_dequeues
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::Unavailable("connection reset".into()));
        }

        let deadline = Instant::now() + wait;
        loop {
            let next = self.items.lock().pop_back();
            if let Some(payload) = next {
                return Ok(Some(Delivery::new(payload)));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || tokio::time::timeout(remaining, self.notify.notified())
                    .await
                    .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.items.lock().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        let first = ProvisioningMessage::new(Uuid::new_v4(), "a", "AAAAAAAAAAA");
        let second = ProvisioningMessage::new(Uuid::new_v4(), "b", "BBBBBBBBBBB");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let wait = Duration::from_millis(10);
        let got = queue.dequeue(wait).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(got, first);
        let got = queue.dequeue(wait).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(got, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let started = Instant::now();
        assert!(queue.dequeue(Duration::from_secs(5)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push_raw("payload");

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, "payload");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let queue = MemoryQueue::new();
        queue.fail_next_dequeues(1);
        let err = queue.dequeue(Duration::from_millis(1)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(queue.dequeue(Duration::from_millis(1)).await.unwrap().is_none());

        queue.reject_enqueues(true);
        let message = ProvisioningMessage::new(Uuid::new_v4(), "a", "AAAAAAAAAAA");
        assert!(queue.enqueue(&message).await.is_err());
        assert!(queue.pending().is_empty());
    }
}
