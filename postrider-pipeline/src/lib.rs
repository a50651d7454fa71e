//! Condition/action mail processing with state-machine routing.
//!
//! A [`Processor`] is a named, ordered list of steps; each step pairs a
//! [`Condition`] (which recipients does this apply to?) with an [`Action`]
//! (what happens to them?). A mail item's `state` names the processor that
//! handles it next, so an action that rewrites the state reroutes the item
//! through the [`ProcessorRegistry`] on its next dequeue.

pub mod action;
pub mod condition;
pub mod config;
pub mod error;
pub mod plugin;
pub mod processor;
pub mod registry;

pub use action::{Action, Discard, Null, RemoveMatched, ToProcessor};
pub use condition::{All, Condition, RecipientsOnDomain};
pub use config::{ProcessorConfig, SpecConfig, StepConfig};
pub use error::{ConfigError, StepError};
pub use plugin::PluginRegistry;
pub use processor::{Disposition, PassOutcome, Processor, Step};
pub use registry::{ProcessorRegistry, ProcessorRegistryBuilder};
