//! Pipeline configuration surface
//!
//! Deserialized from the application config file and resolved against a
//! [`crate::plugin::PluginRegistry`] before any mail is processed.

use ahash::AHashMap;
use postrider_common::AttributeValue;
use serde::Deserialize;

/// One named processor and its ordered steps.
///
/// ```ron
/// (
///     name: "root",
///     steps: [
///         (
///             condition: (name: "recipients-on-domain", config: {"domain": String("example.org")}),
///             action: (name: "to-processor", config: {"processor": String("local")}),
///         ),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One condition/action pair.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub condition: SpecConfig,
    pub action: SpecConfig,
}

/// A symbolic plugin name plus its free-form scalar configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecConfig {
    pub name: String,
    #[serde(default)]
    pub config: AHashMap<String, AttributeValue>,
}

impl SpecConfig {
    /// Shorthand for specs without configuration.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: AHashMap::new(),
        }
    }

    /// Add one configuration entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
