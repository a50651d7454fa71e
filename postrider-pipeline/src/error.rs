//! Pipeline error types

use thiserror::Error;

/// A single step failing during a processor pass.
///
/// Step errors are item-level: the manager logs them, appends them to the
/// item's error trail, and carries on. They never take a worker down.
#[derive(Debug, Error)]
pub enum StepError {
    /// A condition could not be evaluated
    #[error("condition failed: {0}")]
    Condition(String),

    /// An action could not be applied
    #[error("action failed: {0}")]
    Action(String),
}

/// Configuration problems detected while building the pipeline.
///
/// All of these are fatal at startup; none can occur once mail is flowing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A step names a condition no plugin provides
    #[error("unknown condition '{0}'")]
    UnknownCondition(String),

    /// A step names an action no plugin provides
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// An action routes to a processor that is not configured
    #[error("no processor named '{0}' is configured")]
    UnknownProcessor(String),

    /// A processor tried to claim a reserved state name
    #[error("'{0}' is a reserved state name and cannot be a processor")]
    ReservedName(String),

    /// Every pipeline needs a processor for the initial state
    #[error("no processor is configured for the initial 'root' state")]
    MissingRoot,

    /// The same processor name appeared twice
    #[error("processor '{0}' is configured more than once")]
    DuplicateProcessor(String),

    /// A plugin rejected its configuration map
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
