use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileMailQueue, MemoryMailQueue},
    error::Result,
    retry::RetryPolicy,
    r#trait::MailQueue,
};

/// Configuration for the mail queue backend
///
/// This enum allows runtime selection of the queue implementation through
/// configuration files.
///
/// # Examples
///
/// File-backed queue in RON config (with `unwrap_variant_newtypes`
/// enabled):
/// ```ron
/// Postrider (
///     queue: File(
///         path: "/var/spool/postrider",
///     ),
/// )
/// ```
///
/// Memory-backed queue for testing (unlimited capacity):
/// ```ron
/// Postrider (
///     queue: Memory(),
/// )
/// ```
///
/// Memory-backed queue with capacity limit:
/// ```ron
/// Postrider (
///     queue: Memory(
///         capacity: 1000,
///     ),
/// )
/// ```
///
/// Broker-backed queues carry connection state that does not belong in a
/// config file; construct [`crate::RemoteMailQueue`] directly instead.
#[derive(Debug, Clone, Deserialize)]
pub enum QueueConfig {
    /// File-based queue (production)
    File(FileQueueConfig),
    /// Memory-based queue (testing/development)
    Memory(MemoryQueueConfig),
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File(FileQueueConfig::default())
    }
}

impl QueueConfig {
    /// Get the filesystem path for file-backed queues, if applicable
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(config) => Some(&config.path),
            Self::Memory(_) => None,
        }
    }

    /// Convert the configuration into a running queue behind a trait object
    ///
    /// # Errors
    /// Returns an error if the file backend cannot validate or recover its
    /// queue directory.
    pub fn into_queue(self, policy: RetryPolicy) -> Result<Arc<dyn MailQueue>> {
        match self {
            Self::File(config) => Ok(Arc::new(FileMailQueue::open(config, policy)?)),
            Self::Memory(config) => Ok(Arc::new(MemoryMailQueue::with_config(config, policy))),
        }
    }
}

/// Configuration for the file-backed queue
#[derive(Debug, Clone, Deserialize)]
pub struct FileQueueConfig {
    /// Queue directory; must be an absolute path outside the system
    /// directories
    pub path: PathBuf,
    /// Order ready items of equal priority by id (oldest first) instead of
    /// arbitrarily
    #[serde(default)]
    pub fifo: bool,
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/postrider"),
            fifo: false,
        }
    }
}

/// Configuration for the memory-backed queue
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryQueueConfig {
    /// Order ready items of equal priority by id (oldest first) instead of
    /// arbitrarily
    #[serde(default)]
    pub fifo: bool,
    /// Maximum number of items to hold (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn file_config_from_ron() {
        let config: QueueConfig = ron::from_str(
            r#"#![enable(unwrap_variant_newtypes)] File(path: "/var/spool/postrider", fifo: true)"#,
        )
        .unwrap();
        assert_eq!(
            config.path(),
            Some(std::path::Path::new("/var/spool/postrider"))
        );
    }

    #[test]
    fn memory_config_defaults() {
        let config: MemoryQueueConfig = ron::from_str("()").unwrap();
        assert!(!config.fifo);
        assert_eq!(config.capacity, None);
    }

    #[test]
    fn memory_config_builds_a_queue() {
        let config = QueueConfig::Memory(MemoryQueueConfig {
            fifo: true,
            capacity: Some(8),
        });
        let queue = config.into_queue(RetryPolicy::default()).unwrap();
        assert!(format!("{queue:?}").contains("MemoryMailQueue"));
    }
}
