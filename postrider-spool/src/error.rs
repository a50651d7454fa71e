//! Spool manager error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// A queue call made on the manager's behalf failed
    #[error(transparent)]
    Queue(#[from] postrider_queue::QueueError),

    /// The manager's configuration failed validation
    #[error("invalid spool configuration: {0}")]
    Config(String),
}
