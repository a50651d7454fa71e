//! Composition crate: configuration loading and wiring of the queue
//! backend, processor registry and spool manager into one runnable system.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::PostriderError;
