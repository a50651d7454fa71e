//! Broker-backed mail queue.
//!
//! Locking and visibility are delegated to the transport's at-least-once
//! delivery: a leased item is simply an unacknowledged delivery, and a
//! consumer that dies without settling it causes a redelivery. Delayed
//! visibility rides along as a `not-before` message attribute.

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use async_trait::async_trait;
use postrider_common::{Address, AttributeValue, MailId, MailItem, Priority, State};
use tracing::error;

use crate::{
    error::{QueueError, Result},
    retry::RetryPolicy,
    r#trait::{DequeuedMail, Lease, MailLease, MailQueue},
    transport::{AttributeScalar, Transport, TransportDelivery, TransportMessage},
};

/// How long one receive call waits before reporting an empty receipt.
/// A liveness/latency tuning knob, not a correctness requirement.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pacing bound for messages received before their not-before time.
const NOT_READY_PACE: Duration = Duration::from_millis(250);

mod attr {
    pub const ID: &str = "id";
    pub const SENDER: &str = "sender";
    pub const RECIPIENTS: &str = "recipients";
    pub const STATE: &str = "state";
    pub const ERROR: &str = "error";
    pub const LAST_UPDATED: &str = "last-updated";
    pub const SIZE_HINT: &str = "size-hint";
    pub const PRIORITY: &str = "priority";
    pub const NOT_BEFORE: &str = "not-before";
    pub const ATTRIBUTE_PREFIX: &str = "attr:";
}

/// Mail queue over a broker [`Transport`].
#[derive(Debug)]
pub struct RemoteMailQueue<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
    receive_timeout: Duration,
}

impl<T: Transport + 'static> RemoteMailQueue<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            policy: RetryPolicy::default(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

#[async_trait]
impl<T: Transport + 'static> MailQueue for RemoteMailQueue<T> {
    async fn enqueue(&self, item: MailItem, delay: Duration) -> Result<()> {
        let not_before = SystemTime::now() + delay;
        let message = encode_item(&item, time_to_ms(not_before));
        self.transport.send(message).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<DequeuedMail> {
        loop {
            // An empty receipt means the transport released its resources;
            // just issue another bounded receive.
            let Some(delivery) = self.transport.receive(self.receive_timeout).await? else {
                continue;
            };

            let (item, not_before_ms) = match decode_message(delivery.message()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    // Settle the poison message so it cannot wedge every
                    // consumer through endless redelivery.
                    error!(error = %e, "Received message violating the queue wire contract");
                    let _ = delivery.acknowledge().await;
                    return Err(e);
                }
            };

            let now = SystemTime::now();
            let ready_at =
                ms_to_time(not_before_ms).max(self.policy.ready_at(&item, Duration::ZERO, now));
            if let Ok(remaining) = ready_at.duration_since(now)
                && !remaining.is_zero()
            {
                // Not yet visible: hand it back to the broker and pace the
                // loop so a lone delayed message does not spin us.
                self.transport.send(delivery.message().clone()).await?;
                delivery.acknowledge().await?;
                tokio::time::sleep(remaining.min(NOT_READY_PACE)).await;
                continue;
            }

            return Ok(DequeuedMail {
                item,
                lease: MailLease::new(Box::new(RemoteLease {
                    transport: Arc::clone(&self.transport),
                    policy: self.policy.clone(),
                    delivery,
                })),
            });
        }
    }
}

#[derive(Debug)]
struct RemoteLease<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
    delivery: TransportDelivery,
}

#[async_trait]
impl<T: Transport + 'static> Lease for RemoteLease<T> {
    async fn complete(self: Box<Self>) -> Result<()> {
        self.delivery.acknowledge().await?;
        Ok(())
    }

    async fn requeue(self: Box<Self>, mut item: MailItem) -> Result<()> {
        item.touch();
        let not_before = self
            .policy
            .ready_at(&item, Duration::ZERO, SystemTime::now());
        let message = encode_item(&item, time_to_ms(not_before));

        // Publish the new version before settling the old one; duplicates
        // are the at-least-once cost, loss is not acceptable.
        self.transport.send(message).await?;
        self.delivery.acknowledge().await?;
        Ok(())
    }

    fn abandon(self: Box<Self>) {
        // Dropping the unacknowledged delivery redelivers the stored
        // version to the next consumer.
        drop(self);
    }
}

/// Serialize every mail item field into named scalar attributes plus the
/// payload as the opaque message body.
fn encode_item(item: &MailItem, not_before_ms: u64) -> TransportMessage {
    let mut attributes = AHashMap::new();

    attributes.insert(
        attr::ID.to_string(),
        AttributeScalar::Text(item.id.to_string()),
    );
    if let Some(sender) = &item.sender {
        attributes.insert(
            attr::SENDER.to_string(),
            AttributeScalar::Text(sender.to_string()),
        );
    }
    attributes.insert(
        attr::RECIPIENTS.to_string(),
        AttributeScalar::Text(
            item.recipients
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    );
    attributes.insert(
        attr::STATE.to_string(),
        AttributeScalar::Text(item.state.to_string()),
    );
    if let Some(error) = &item.error_message {
        attributes.insert(attr::ERROR.to_string(), AttributeScalar::Text(error.clone()));
    }
    attributes.insert(
        attr::LAST_UPDATED.to_string(),
        AttributeScalar::Long(i64::try_from(time_to_ms(item.last_updated)).unwrap_or(i64::MAX)),
    );
    if let Some(size) = item.size_hint {
        attributes.insert(
            attr::SIZE_HINT.to_string(),
            AttributeScalar::Long(i64::try_from(size).unwrap_or(i64::MAX)),
        );
    }
    attributes.insert(
        attr::PRIORITY.to_string(),
        AttributeScalar::Long(item.priority.as_i64()),
    );
    attributes.insert(
        attr::NOT_BEFORE.to_string(),
        AttributeScalar::Long(i64::try_from(not_before_ms).unwrap_or(i64::MAX)),
    );

    for (key, value) in &item.attributes {
        // RON keeps the scalar's type through the string-only attribute
        // channel.
        if let Ok(encoded) = ron::to_string(value) {
            attributes.insert(
                format!("{}{key}", attr::ATTRIBUTE_PREFIX),
                AttributeScalar::Text(encoded),
            );
        }
    }

    // The wire contract always carries the payload body; an item without
    // one sends empty bytes.
    let payload = item
        .body
        .clone()
        .unwrap_or_else(|| Arc::from(Vec::new().into_boxed_slice()));

    TransportMessage {
        attributes,
        payload: Some(payload),
    }
}

fn text_attr(message: &TransportMessage, key: &str) -> Result<String> {
    message
        .attributes
        .get(key)
        .and_then(AttributeScalar::as_text)
        .map(ToString::to_string)
        .ok_or_else(|| QueueError::ProtocolViolation(format!("missing '{key}' attribute")))
}

fn long_attr(message: &TransportMessage, key: &str) -> Result<i64> {
    message
        .attributes
        .get(key)
        .and_then(AttributeScalar::as_long)
        .ok_or_else(|| QueueError::ProtocolViolation(format!("missing '{key}' attribute")))
}

/// Rebuild a mail item from a transported message.
fn decode_message(message: &TransportMessage) -> Result<(MailItem, u64)> {
    let Some(payload) = &message.payload else {
        return Err(QueueError::ProtocolViolation(
            "message is missing the payload body".to_string(),
        ));
    };

    let id = MailId::parse(&text_attr(message, attr::ID)?)
        .ok_or_else(|| QueueError::ProtocolViolation("malformed 'id' attribute".to_string()))?;

    let sender = message
        .attributes
        .get(attr::SENDER)
        .and_then(AttributeScalar::as_text)
        .map(Address::parse)
        .transpose()
        .map_err(|e| QueueError::ProtocolViolation(format!("malformed 'sender' attribute: {e}")))?;

    let recipients = text_attr(message, attr::RECIPIENTS)?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(Address::parse)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            QueueError::ProtocolViolation(format!("malformed 'recipients' attribute: {e}"))
        })?;

    let state = State::new(text_attr(message, attr::STATE)?);

    let error_message = message
        .attributes
        .get(attr::ERROR)
        .and_then(AttributeScalar::as_text)
        .map(ToString::to_string);

    let last_updated = ms_to_time(
        u64::try_from(long_attr(message, attr::LAST_UPDATED)?).map_err(|_| {
            QueueError::ProtocolViolation("negative 'last-updated' attribute".to_string())
        })?,
    );

    let size_hint = message
        .attributes
        .get(attr::SIZE_HINT)
        .and_then(AttributeScalar::as_long)
        .map(|v| {
            u64::try_from(v).map_err(|_| {
                QueueError::ProtocolViolation("negative 'size-hint' attribute".to_string())
            })
        })
        .transpose()?;

    let priority = Priority::from_i64(long_attr(message, attr::PRIORITY)?).ok_or_else(|| {
        QueueError::ProtocolViolation("out-of-range 'priority' attribute".to_string())
    })?;

    let not_before_ms = u64::try_from(long_attr(message, attr::NOT_BEFORE)?).map_err(|_| {
        QueueError::ProtocolViolation("negative 'not-before' attribute".to_string())
    })?;

    let mut attributes = AHashMap::new();
    for (key, value) in &message.attributes {
        if let Some(name) = key.strip_prefix(attr::ATTRIBUTE_PREFIX) {
            let text = value.as_text().ok_or_else(|| {
                QueueError::ProtocolViolation(format!("non-text mail attribute '{name}'"))
            })?;
            let decoded: AttributeValue = ron::from_str(text).map_err(|e| {
                QueueError::ProtocolViolation(format!("undecodable mail attribute '{name}': {e}"))
            })?;
            attributes.insert(name.to_string(), decoded);
        }
    }

    let body = if payload.is_empty() {
        None
    } else {
        Some(Arc::clone(payload))
    };

    Ok((
        MailItem {
            id,
            sender,
            recipients,
            state,
            attributes,
            error_message,
            last_updated,
            size_hint,
            priority,
            body,
        },
        not_before_ms,
    ))
}

fn time_to_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn ms_to_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
