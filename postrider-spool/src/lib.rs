//! The spool manager: a fixed pool of workers checking mail items out of a
//! [`postrider_queue::MailQueue`], running the processor their state names,
//! and settling them back: removal for terminal items, redelivery for the
//! rest.

pub mod config;
pub mod error;
pub mod manager;
pub mod stats;

pub use config::SpoolConfig;
pub use error::SpoolError;
pub use manager::SpoolManager;
pub use stats::{ProcessorStats, SpoolStats};
