//! Error types for the postrider-queue crate.
//!
//! Every queue operation returns [`QueueError`]. Callers must treat an item
//! as NOT enqueued when `enqueue` fails; there is no partial visibility.

use std::io;

use postrider_common::MailId;
use thiserror::Error;

use crate::transport::TransportError;

/// Storage or transport failure during a queue operation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Durable record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Item not present in the queue.
    #[error("Mail item not found: {0}")]
    NotFound(MailId),

    /// Memory queue capacity bound reached.
    #[error("Queue capacity exceeded: {len}/{capacity} items")]
    CapacityExceeded { len: usize, capacity: usize },

    /// Queue directory validation failed.
    #[error("Queue validation error: {0}")]
    Validation(String),

    /// Underlying broker transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A transported message violated the wire contract. Non-retryable:
    /// redelivering the same message cannot succeed.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Internal error (lock poisoning, invariant breach).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// True when retrying the same operation cannot succeed.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

impl From<bincode::error::EncodeError> for QueueError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for QueueError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
