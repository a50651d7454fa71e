//! Spool manager configuration

use serde::Deserialize;

const fn default_workers() -> usize {
    4
}

const fn default_shutdown_grace() -> u64 {
    60
}

/// Sizing and shutdown behaviour of the worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    /// Number of concurrent worker tasks, each processing one item at a time
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long shutdown waits for in-flight items before detaching the
    /// remaining workers (in seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl SpoolConfig {
    /// # Errors
    /// [`crate::SpoolError::Config`] when `workers` is zero.
    pub fn validate(&self) -> Result<(), crate::error::SpoolError> {
        if self.workers == 0 {
            return Err(crate::error::SpoolError::Config(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
