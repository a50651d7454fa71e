//! Message-passing boundary for the broker-backed queue.
//!
//! A [`Transport`] provides at-least-once delivery: a received message must
//! be acknowledged explicitly, and a delivery dropped unacknowledged is
//! redelivered to a later `receive`. The broker queue serializes every mail
//! item field into string/long message attributes plus the payload as the
//! opaque message body; see [`crate::backends::remote`].

use std::{
    collections::VecDeque,
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use ahash::AHashMap;
use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::Notify, time::Instant};

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is no longer usable (connection lost, shut down).
    #[error("Transport closed: {0}")]
    Closed(String),

    /// Any other broker-side failure.
    #[error("Transport failure: {0}")]
    Other(String),
}

/// A primitive scalar carried as a named message attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeScalar {
    Text(String),
    Long(i64),
}

impl AttributeScalar {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Long(_) => None,
        }
    }

    #[must_use]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

/// One transported message: named scalar attributes plus an opaque body.
#[derive(Debug, Clone, Default)]
pub struct TransportMessage {
    pub attributes: AHashMap<String, AttributeScalar>,
    pub payload: Option<Arc<[u8]>>,
}

/// Completion token for one received message. Dropping a tag without
/// acknowledging redelivers the message.
#[async_trait]
pub trait DeliveryTag: Send + Debug {
    /// Settle the message; it will not be redelivered.
    async fn acknowledge(self: Box<Self>) -> Result<(), TransportError>;
}

/// A received message together with its completion token.
#[derive(Debug)]
pub struct TransportDelivery {
    message: TransportMessage,
    tag: Box<dyn DeliveryTag>,
}

impl TransportDelivery {
    #[must_use]
    pub fn new(message: TransportMessage, tag: Box<dyn DeliveryTag>) -> Self {
        Self { message, tag }
    }

    #[must_use]
    pub const fn message(&self) -> &TransportMessage {
        &self.message
    }

    /// Settle the delivery.
    ///
    /// # Errors
    /// [`TransportError`] if the broker rejected the acknowledgement.
    pub async fn acknowledge(self) -> Result<(), TransportError> {
        self.tag.acknowledge().await
    }
}

/// At-least-once message passing.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Publish a message.
    ///
    /// # Errors
    /// [`TransportError`] if the message could not be handed to the broker.
    async fn send(&self, message: TransportMessage) -> Result<(), TransportError>;

    /// Receive one message, waiting up to `timeout`. `Ok(None)` is an empty
    /// receipt: the caller releases any held resources and retries. The
    /// timeout is a liveness/latency knob, not a correctness requirement.
    ///
    /// # Errors
    /// [`TransportError`] on broker failure.
    async fn receive(&self, timeout: Duration) -> Result<Option<TransportDelivery>, TransportError>;
}

/// In-process [`Transport`] backed by a shared deque.
///
/// Redelivery goes to the front of the deque, so an unacknowledged message
/// is offered again before newer arrivals. Intended for tests and
/// single-node deployments; a real broker client implements the same trait.
#[derive(Debug, Clone, Default)]
pub struct InProcessTransport {
    inner: Arc<ChannelInner>,
}

#[derive(Debug, Default)]
struct ChannelInner {
    messages: Mutex<VecDeque<TransportMessage>>,
    notify: Notify,
}

impl ChannelInner {
    fn push_back(&self, message: TransportMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
        self.notify.notify_waiters();
    }

    fn push_front(&self, message: TransportMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(message);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<TransportMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl InProcessTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently waiting (undelivered).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, message: TransportMessage) -> Result<(), TransportError> {
        self.inner.push_back(message);
        Ok(())
    }

    async fn receive(
        &self,
        timeout: Duration,
    ) -> Result<Option<TransportDelivery>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.inner.pop() {
                let tag = Box::new(InProcessTag {
                    inner: Arc::clone(&self.inner),
                    message: Some(message.clone()),
                });
                return Ok(Some(TransportDelivery::new(message, tag)));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(remaining) => {}
            }
        }
    }
}

#[derive(Debug)]
struct InProcessTag {
    inner: Arc<ChannelInner>,
    message: Option<TransportMessage>,
}

#[async_trait]
impl DeliveryTag for InProcessTag {
    async fn acknowledge(mut self: Box<Self>) -> Result<(), TransportError> {
        self.message = None;
        Ok(())
    }
}

impl Drop for InProcessTag {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.inner.push_front(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(body: &str) -> TransportMessage {
        let mut attributes = AHashMap::new();
        attributes.insert("key".to_string(), AttributeScalar::Text(body.to_string()));
        TransportMessage {
            attributes,
            payload: Some(Arc::from(body.as_bytes())),
        }
    }

    #[tokio::test]
    async fn empty_receipt_after_timeout() {
        let transport = InProcessTransport::new();
        let received = transport.receive(Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn acknowledged_messages_are_gone() {
        let transport = InProcessTransport::new();
        transport.send(text_message("one")).await.unwrap();

        let delivery = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        delivery.acknowledge().await.unwrap();

        assert_eq!(transport.depth(), 0);
        assert!(
            transport
                .receive(Duration::from_millis(50))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unacknowledged_deliveries_are_redelivered() {
        let transport = InProcessTransport::new();
        transport.send(text_message("one")).await.unwrap();

        let delivery = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        drop(delivery);

        let redelivered = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            redelivered.message().attributes.get("key"),
            Some(&AttributeScalar::Text("one".to_string()))
        );
    }

    #[tokio::test]
    async fn redelivery_goes_to_the_front() {
        let transport = InProcessTransport::new();
        transport.send(text_message("first")).await.unwrap();
        transport.send(text_message("second")).await.unwrap();

        let delivery = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        drop(delivery);

        let next = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            next.message().attributes.get("key"),
            Some(&AttributeScalar::Text("first".to_string()))
        );
    }
}
