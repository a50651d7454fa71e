use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use postrider_common::{MailId, MailItem};

use crate::{
    config::MemoryQueueConfig,
    error::{QueueError, Result},
    index::VisibilityIndex,
    retry::RetryPolicy,
    r#trait::{DequeuedMail, Lease, MailLease, MailQueue},
};

/// In-memory mail queue.
///
/// Items live in a `HashMap` guarded by a mutex; eligibility and locking
/// are tracked by the shared visibility index. Primarily intended for
/// testing and transient single-process setups, but behaves exactly like
/// the durable backends from the consumer's point of view.
///
/// # Capacity
/// An optional capacity bound makes `enqueue` fail once reached, which
/// keeps an accidental production use from growing without bound.
#[derive(Debug, Clone)]
pub struct MemoryMailQueue {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    items: Mutex<HashMap<MailId, MailItem>>,
    index: Arc<VisibilityIndex>,
    policy: RetryPolicy,
    capacity: Option<usize>,
}

impl Default for MemoryMailQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMailQueue {
    /// Unbounded queue without FIFO ordering or retry delays.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryQueueConfig::default(), RetryPolicy::default())
    }

    #[must_use]
    pub fn with_config(config: MemoryQueueConfig, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                items: Mutex::new(HashMap::new()),
                index: VisibilityIndex::new(config.fifo),
                policy,
                capacity: config.capacity,
            }),
        }
    }

    /// Number of items currently stored (visible, delayed, and leased).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MailQueue for MemoryMailQueue {
    async fn enqueue(&self, item: MailItem, delay: Duration) -> Result<()> {
        let now = SystemTime::now();
        let ready_at = self.inner.policy.ready_at(&item, delay, now);
        let (id, priority) = (item.id, item.priority);

        {
            let mut items = self
                .inner
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(capacity) = self.inner.capacity
                && !items.contains_key(&id)
                && items.len() >= capacity
            {
                return Err(QueueError::CapacityExceeded {
                    len: items.len(),
                    capacity,
                });
            }

            items.insert(id, item);
        }

        self.inner.index.insert(id, priority, ready_at);
        Ok(())
    }

    async fn dequeue(&self) -> Result<DequeuedMail> {
        let claim = self.inner.index.acquire().await;

        let item = self
            .inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&claim.id())
            .cloned()
            .ok_or_else(|| {
                QueueError::Internal(format!("indexed item {} has no stored record", claim.id()))
            })?;

        let id = claim.defuse();
        Ok(DequeuedMail {
            item,
            lease: MailLease::new(Box::new(MemoryLease {
                inner: Arc::clone(&self.inner),
                id,
            })),
        })
    }
}

#[derive(Debug)]
struct MemoryLease {
    inner: Arc<MemoryInner>,
    id: MailId,
}

#[async_trait]
impl Lease for MemoryLease {
    async fn complete(self: Box<Self>) -> Result<()> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        self.inner.index.remove(self.id);
        Ok(())
    }

    async fn requeue(self: Box<Self>, mut item: MailItem) -> Result<()> {
        item.touch();
        let ready_at = self
            .inner
            .policy
            .ready_at(&item, Duration::ZERO, SystemTime::now());
        let priority = item.priority;

        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.id, item);
        self.inner.index.unlock_at(self.id, priority, ready_at);
        Ok(())
    }

    fn abandon(self: Box<Self>) {
        self.inner.index.unlock(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use postrider_common::{Address, AttributeValue, Priority, State};
    use pretty_assertions::assert_eq;

    use super::*;

    fn test_item() -> MailItem {
        let mut item = MailItem::new(
            Some(Address::new("sender", "example.com")),
            vec![Address::new("rcpt", "example.org")],
            Some(Arc::from(b"payload".as_slice())),
        );
        item.attributes
            .insert("flag".to_string(), AttributeValue::from(true));
        item
    }

    fn fifo_config() -> MemoryQueueConfig {
        MemoryQueueConfig {
            fifo: true,
            capacity: None,
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_all_fields() {
        let queue = MemoryMailQueue::new();
        let item = test_item();

        queue.enqueue(item.clone(), Duration::ZERO).await.unwrap();
        let dequeued = queue.dequeue().await.unwrap();

        assert_eq!(dequeued.item, item);
        dequeued.lease.complete().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_consumer_per_item() {
        let queue = MemoryMailQueue::new();
        queue
            .enqueue(test_item(), Duration::ZERO)
            .await
            .unwrap();

        let first = queue.dequeue().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(second.is_err(), "leased item must not be dequeued twice");

        first.lease.release();
        let reclaimed = tokio::time::timeout(Duration::from_millis(200), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        reclaimed.lease.complete().await.unwrap();
    }

    #[tokio::test]
    async fn delay_is_honoured_and_undelayed_items_overtake() {
        let queue = MemoryMailQueue::new();
        let delayed = test_item();
        let prompt = test_item();
        let start = Instant::now();

        queue
            .enqueue(delayed.clone(), Duration::from_millis(200))
            .await
            .unwrap();
        queue.enqueue(prompt.clone(), Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.item.id, prompt.id);
        first.lease.complete().await.unwrap();

        let second = queue.dequeue().await.unwrap();
        assert_eq!(second.item.id, delayed.id);
        assert!(
            start.elapsed() >= Duration::from_millis(190),
            "delayed item surfaced after {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn fifo_orders_by_id() {
        let queue = MemoryMailQueue::with_config(fifo_config(), RetryPolicy::default());

        let mut a = test_item();
        a.id = MailId::from_ulid(ulid::Ulid::from_parts(1, 0));
        let mut b = test_item();
        b.id = MailId::from_ulid(ulid::Ulid::from_parts(2, 0));

        // Enqueue out of order; FIFO mode sorts the visible set by key.
        queue.enqueue(b.clone(), Duration::ZERO).await.unwrap();
        queue.enqueue(a.clone(), Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.item.id, a.id);
        first.lease.complete().await.unwrap();

        let second = queue.dequeue().await.unwrap();
        assert_eq!(second.item.id, b.id);
    }

    #[tokio::test]
    async fn priority_first_then_fifo_within_tier() {
        let queue = MemoryMailQueue::with_config(fifo_config(), RetryPolicy::default());

        let mut normal = test_item();
        normal.id = MailId::from_ulid(ulid::Ulid::from_parts(1, 0));
        let mut high = test_item();
        high.id = MailId::from_ulid(ulid::Ulid::from_parts(2, 0));
        high.priority = Priority::High;

        queue.enqueue(normal.clone(), Duration::ZERO).await.unwrap();
        queue.enqueue(high.clone(), Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.item.id, high.id, "higher priority wins despite FIFO");
    }

    #[tokio::test]
    async fn retry_states_wait_for_their_delay() {
        let policy =
            RetryPolicy::new().with_delay(State::new("error"), Duration::from_millis(200));
        let queue = MemoryMailQueue::with_config(MemoryQueueConfig::default(), policy);

        let mut item = test_item();
        item.state = State::new("error");
        item.last_updated = SystemTime::now();
        let start = Instant::now();

        queue.enqueue(item.clone(), Duration::ZERO).await.unwrap();
        let dequeued = queue.dequeue().await.unwrap();

        assert_eq!(dequeued.item.id, item.id);
        assert!(
            start.elapsed() >= Duration::from_millis(190),
            "error-state item surfaced after {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn readiness_orders_by_last_updated() {
        let policy =
            RetryPolicy::new().with_delay(State::new("error"), Duration::from_millis(200));
        let queue = MemoryMailQueue::with_config(MemoryQueueConfig::default(), policy);

        let mut older = test_item();
        older.state = State::new("error");
        older.last_updated = SystemTime::now() - Duration::from_millis(150);

        let mut newer = test_item();
        newer.state = State::new("error");
        newer.last_updated = SystemTime::now();

        queue.enqueue(newer.clone(), Duration::ZERO).await.unwrap();
        queue.enqueue(older.clone(), Duration::ZERO).await.unwrap();

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.item.id, older.id, "earlier readiness is offered first");
    }

    #[tokio::test]
    async fn capacity_bound_is_enforced() {
        let config = MemoryQueueConfig {
            fifo: false,
            capacity: Some(1),
        };
        let queue = MemoryMailQueue::with_config(config, RetryPolicy::default());

        queue.enqueue(test_item(), Duration::ZERO).await.unwrap();
        let err = queue
            .enqueue(test_item(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn requeue_stores_the_mutated_item() {
        let queue = MemoryMailQueue::new();
        queue.enqueue(test_item(), Duration::ZERO).await.unwrap();

        let (mut item, lease) = queue.dequeue().await.unwrap().into_parts();
        let before = item.last_updated;
        item.state = State::new("transport");
        lease.requeue(item.clone()).await.unwrap();

        let second = queue.dequeue().await.unwrap();
        assert_eq!(second.item.state, State::new("transport"));
        assert!(
            second.item.last_updated >= before,
            "requeue must stamp last_updated"
        );
    }

    #[tokio::test]
    async fn completed_items_are_never_redelivered() {
        let queue = MemoryMailQueue::new();
        queue.enqueue(test_item(), Duration::ZERO).await.unwrap();

        queue.dequeue().await.unwrap().lease.complete().await.unwrap();

        let again = tokio::time::timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(again.is_err(), "completed item must be gone");
    }
}
