//! Symbolic-name resolution for conditions and actions
//!
//! Plugins register factory closures under a name; pipeline configuration
//! refers to those names. Resolution happens entirely at startup, so an
//! unknown name can never surface while mail is flowing.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use postrider_common::{AttributeValue, State};

use crate::{
    action::{Action, Discard, Null, RemoveMatched, ToProcessor},
    condition::{All, Condition, RecipientsOnDomain},
    config::SpecConfig,
    error::ConfigError,
};

type Settings = AHashMap<String, AttributeValue>;

pub type ConditionFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn Condition>, ConfigError> + Send + Sync>;
pub type ActionFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync>;

/// Name → factory tables for every condition and action the pipeline may
/// reference.
#[derive(Default)]
pub struct PluginRegistry {
    conditions: AHashMap<String, ConditionFactory>,
    actions: AHashMap<String, ActionFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("conditions", &self.conditions.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry; see [`PluginRegistry::with_builtins`] for one that
    /// is immediately useful.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in set:
    ///
    /// | kind      | name                   | settings      |
    /// |-----------|------------------------|---------------|
    /// | condition | `all`                  |               |
    /// | condition | `recipients-on-domain` | `domain`      |
    /// | action    | `to-processor`         | `processor`   |
    /// | action    | `discard`              |               |
    /// | action    | `remove-matched`       |               |
    /// | action    | `null`                 |               |
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_condition("all", |_| Ok(Arc::new(All)));
        registry.register_condition("recipients-on-domain", |settings| {
            let domain = required_str(settings, "recipients-on-domain", "domain")?;
            Ok(Arc::new(RecipientsOnDomain::new(domain)))
        });

        registry.register_action("to-processor", |settings| {
            let target = required_str(settings, "to-processor", "processor")?;
            Ok(Arc::new(ToProcessor::new(State::new(target))))
        });
        registry.register_action("discard", |_| Ok(Arc::new(Discard)));
        registry.register_action("remove-matched", |_| Ok(Arc::new(RemoveMatched)));
        registry.register_action("null", |_| Ok(Arc::new(Null)));

        registry
    }

    pub fn register_condition<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn Condition>, ConfigError> + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Box::new(factory));
    }

    pub fn register_action<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Box::new(factory));
    }

    /// Resolve a condition spec.
    ///
    /// # Errors
    /// [`ConfigError::UnknownCondition`] for an unregistered name, or
    /// whatever the factory rejects in the settings map.
    pub fn condition(&self, spec: &SpecConfig) -> Result<Arc<dyn Condition>, ConfigError> {
        self.conditions
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownCondition(spec.name.clone()))?(
            &spec.config
        )
    }

    /// Resolve an action spec.
    ///
    /// # Errors
    /// [`ConfigError::UnknownAction`] for an unregistered name, or whatever
    /// the factory rejects in the settings map.
    pub fn action(&self, spec: &SpecConfig) -> Result<Arc<dyn Action>, ConfigError> {
        self.actions
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownAction(spec.name.clone()))?(
            &spec.config
        )
    }
}

fn required_str<'s>(
    settings: &'s Settings,
    plugin: &str,
    key: &str,
) -> Result<&'s str, ConfigError> {
    settings
        .get(key)
        .and_then(AttributeValue::as_str)
        .ok_or_else(|| ConfigError::Invalid(format!("'{plugin}' requires a string '{key}' setting")))
}
