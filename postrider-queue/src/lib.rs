//! Durable storage of in-flight mail with per-item exclusive leasing,
//! optional delayed redelivery, and pluggable backing stores.
//!
//! Three backends implement the [`MailQueue`] contract:
//! - [`MemoryMailQueue`]: in-process, for tests and transient setups
//! - [`FileMailQueue`]: one file pair per item, recovers across restarts
//! - [`RemoteMailQueue`]: broker-backed, over a [`Transport`]

pub mod backends;
pub mod config;
pub mod error;
mod index;
pub mod retry;
pub mod r#trait;
pub mod transport;

pub use backends::{FileMailQueue, MemoryMailQueue, RemoteMailQueue};
pub use config::{FileQueueConfig, MemoryQueueConfig, QueueConfig};
pub use error::{QueueError, Result};
pub use retry::RetryPolicy;
pub use r#trait::{DequeuedMail, MailLease, MailQueue};
pub use transport::{
    AttributeScalar, InProcessTransport, Transport, TransportDelivery, TransportError,
    TransportMessage,
};
