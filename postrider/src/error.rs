//! Top-level composition errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostriderError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error(transparent)]
    Pipeline(#[from] postrider_pipeline::ConfigError),

    #[error(transparent)]
    Queue(#[from] postrider_queue::QueueError),

    #[error(transparent)]
    Spool(#[from] postrider_spool::SpoolError),
}
