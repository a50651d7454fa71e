//! The application configuration file
//!
//! One RON document wires the whole system: the queue backend, the retry
//! delays, the worker pool, and every processor's steps.
//!
//! ```ron
//! (
//!     spool: (
//!         workers: 4,
//!     ),
//!     queue: File(
//!         path: "/var/spool/postrider",
//!         fifo: true,
//!     ),
//!     retry: {
//!         "error": 300,
//!     },
//!     processors: [
//!         (
//!             name: "root",
//!             steps: [
//!                 (
//!                     condition: (name: "all"),
//!                     action: (name: "to-processor", config: {"processor": String("transport")}),
//!                 ),
//!             ],
//!         ),
//!         (
//!             name: "transport",
//!             steps: [
//!                 (
//!                     condition: (name: "all"),
//!                     action: (name: "remove-matched"),
//!                 ),
//!             ],
//!         ),
//!     ],
//! )
//! ```

use std::{path::Path, sync::Arc, time::Duration};

use ahash::AHashMap;
use postrider_common::State;
use postrider_pipeline::{PluginRegistry, ProcessorConfig, ProcessorRegistry};
use postrider_queue::{QueueConfig, RetryPolicy};
use postrider_spool::{SpoolConfig, SpoolManager};
use serde::Deserialize;

use crate::error::PostriderError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Worker pool sizing and shutdown grace
    #[serde(default)]
    pub spool: SpoolConfig,

    /// Which queue backend holds in-flight mail
    #[serde(default)]
    pub queue: QueueConfig,

    /// State name → redelivery delay in seconds for error-handling states
    #[serde(default)]
    pub retry: AHashMap<String, u64>,

    /// Every processor, keyed into by mail item state
    pub processors: Vec<ProcessorConfig>,
}

impl Config {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// [`PostriderError::Io`] when the file cannot be read,
    /// [`PostriderError::Parse`] when it is not valid RON.
    pub fn from_path(path: &Path) -> Result<Self, PostriderError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a configuration document. Variant newtypes are unwrapped, so
    /// `queue: File(path: "...")` works without an extension header.
    ///
    /// # Errors
    /// [`PostriderError::Parse`] for invalid RON.
    pub fn parse(content: &str) -> Result<Self, PostriderError> {
        let options = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::UNWRAP_VARIANT_NEWTYPES);
        Ok(options.from_str(content)?)
    }

    /// The retry delays as the queue consumes them.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .iter()
            .fold(RetryPolicy::new(), |policy, (state, secs)| {
                policy.with_delay(State::new(state.as_str()), Duration::from_secs(*secs))
            })
    }

    /// Resolve the configuration into a runnable [`SpoolManager`].
    ///
    /// Every symbolic plugin name is resolved here; a bad pipeline never
    /// gets as far as touching mail.
    ///
    /// # Errors
    /// Pipeline resolution, queue backend and spool validation errors, all
    /// fatal at startup.
    pub fn build(self, plugins: &PluginRegistry) -> Result<SpoolManager, PostriderError> {
        let registry = ProcessorRegistry::from_config(&self.processors, plugins)?;
        let policy = self.retry_policy();
        let queue = self.queue.into_queue(policy)?;
        Ok(SpoolManager::new(queue, Arc::new(registry), self.spool)?)
    }
}
