use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use postrider_common::MailItem;

use crate::error::Result;

/// Durable storage of in-flight mail items.
///
/// Implementations must guarantee at most one outstanding lease per item id:
/// two consumers must never hold the same item concurrently. `enqueue`
/// failures leave the item NOT enqueued, with no partial visibility.
#[async_trait]
pub trait MailQueue: Send + Sync + Debug {
    /// Persist `item`. With a non-zero `delay` the item stays invisible to
    /// [`MailQueue::dequeue`] until `now + delay` has elapsed.
    ///
    /// # Errors
    /// [`crate::QueueError`] on any storage or transport failure.
    async fn enqueue(&self, item: MailItem, delay: Duration) -> Result<()>;

    /// Await an eligible item (visible and unlocked) and lease it
    /// exclusively. The future only resolves once an item is available;
    /// callers cancel it via their own shutdown signalling.
    ///
    /// # Errors
    /// [`crate::QueueError`] on storage failure, or a non-retryable
    /// [`crate::QueueError::ProtocolViolation`] from the broker backend.
    async fn dequeue(&self) -> Result<DequeuedMail>;
}

/// An item checked out of the queue, together with its exclusive lease.
#[derive(Debug)]
pub struct DequeuedMail {
    pub item: MailItem,
    pub lease: MailLease,
}

impl DequeuedMail {
    #[must_use]
    pub fn into_parts(self) -> (MailItem, MailLease) {
        (self.item, self.lease)
    }
}

/// Backend-facing lease operations. Backends implement this; consumers only
/// see [`MailLease`].
#[async_trait]
pub(crate) trait Lease: Send + Debug {
    /// Remove the item permanently.
    async fn complete(self: Box<Self>) -> Result<()>;

    /// Durably re-store the (possibly mutated) item and make it visible
    /// again, honouring the queue's retry policy for its new state.
    async fn requeue(self: Box<Self>, item: MailItem) -> Result<()>;

    /// Unlock without storing; the last durably stored version becomes
    /// visible again. Synchronous so it can run from `Drop`.
    fn abandon(self: Box<Self>);
}

/// Exclusive completion handle for a dequeued item.
///
/// Every operation consumes the lease, so releasing twice or mutating an
/// item that is not held is unrepresentable. Dropping a lease without
/// completing it behaves like [`MailLease::release`]: the stored version of
/// the item becomes eligible for another consumer.
#[derive(Debug)]
pub struct MailLease {
    inner: Option<Box<dyn Lease>>,
}

impl MailLease {
    pub(crate) fn new(inner: Box<dyn Lease>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Remove the item permanently; it is never redelivered.
    ///
    /// # Errors
    /// [`crate::QueueError`] if the removal could not be persisted.
    pub async fn complete(mut self) -> Result<()> {
        match self.inner.take() {
            Some(lease) => lease.complete().await,
            None => Ok(()),
        }
    }

    /// Re-store the mutated item for another pass. The backend stamps
    /// `last_updated` and computes the item's next visibility from its
    /// retry policy.
    ///
    /// # Errors
    /// [`crate::QueueError`] if the store could not be persisted; the
    /// previously stored version then remains authoritative.
    pub async fn requeue(mut self, item: MailItem) -> Result<()> {
        match self.inner.take() {
            Some(lease) => lease.requeue(item).await,
            None => Ok(()),
        }
    }

    /// Give the item up unchanged; another consumer may take it.
    pub fn release(mut self) {
        if let Some(lease) = self.inner.take() {
            lease.abandon();
        }
    }
}

impl Drop for MailLease {
    fn drop(&mut self) {
        if let Some(lease) = self.inner.take() {
            lease.abandon();
        }
    }
}
