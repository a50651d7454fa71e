//! The state → processor dispatch table

use std::sync::Arc;

use ahash::AHashMap;
use postrider_common::State;
use tracing::info;

use crate::{
    config::ProcessorConfig,
    error::ConfigError,
    plugin::PluginRegistry,
    processor::{Processor, Step},
};

/// Immutable dispatch table mapping a mail item's state to the processor
/// that handles it. Built once at startup and shared read-only across all
/// workers.
#[derive(Debug)]
pub struct ProcessorRegistry {
    processors: AHashMap<State, Arc<Processor>>,
}

impl ProcessorRegistry {
    #[must_use]
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    /// Build the registry from deserialized configuration, resolving every
    /// symbolic plugin name up front.
    ///
    /// # Errors
    /// Any [`ConfigError`]: unknown plugin names, bad plugin settings,
    /// reserved or duplicate processor names, a `to-processor` target with
    /// no processor, or a missing root processor.
    pub fn from_config(
        configs: &[ProcessorConfig],
        plugins: &PluginRegistry,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        for config in configs {
            let mut steps = Vec::with_capacity(config.steps.len());
            for step in &config.steps {
                steps.push(Step::new(
                    plugins.condition(&step.condition)?,
                    plugins.action(&step.action)?,
                ));
            }
            builder = builder.register(Processor::new(State::new(&*config.name), steps))?;
        }

        // Routing targets are plain strings inside the actions; validate the
        // ones the config surface can see.
        let registry = builder.build()?;
        for config in configs {
            for step in &config.steps {
                if step.action.name == "to-processor"
                    && let Some(target) = step.action.config.get("processor").and_then(|v| v.as_str())
                {
                    let target = State::new(target);
                    if !target.is_discard() && !registry.contains(&target) {
                        return Err(ConfigError::UnknownProcessor(target.to_string()));
                    }
                }
            }
        }

        info!(
            processors = registry.processors.len(),
            "Processor registry built"
        );
        Ok(registry)
    }

    #[must_use]
    pub fn get(&self, state: &State) -> Option<Arc<Processor>> {
        self.processors.get(state).cloned()
    }

    #[must_use]
    pub fn contains(&self, state: &State) -> bool {
        self.processors.contains_key(state)
    }

    pub fn names(&self) -> impl Iterator<Item = &State> {
        self.processors.keys()
    }
}

/// Accumulates processors and enforces the naming rules on `build`.
#[derive(Debug, Default)]
pub struct ProcessorRegistryBuilder {
    processors: AHashMap<State, Arc<Processor>>,
}

impl ProcessorRegistryBuilder {
    /// Add one processor.
    ///
    /// # Errors
    /// [`ConfigError::ReservedName`] for the terminal discard state, which
    /// must never run; [`ConfigError::DuplicateProcessor`] for a repeated
    /// name.
    pub fn register(mut self, processor: Processor) -> Result<Self, ConfigError> {
        let name = processor.name().clone();
        if name.is_discard() {
            return Err(ConfigError::ReservedName(name.to_string()));
        }
        if self.processors.contains_key(&name) {
            return Err(ConfigError::DuplicateProcessor(name.to_string()));
        }
        self.processors.insert(name, Arc::new(processor));
        Ok(self)
    }

    /// Finish the registry.
    ///
    /// # Errors
    /// [`ConfigError::MissingRoot`] unless a processor handles the initial
    /// root state.
    pub fn build(self) -> Result<ProcessorRegistry, ConfigError> {
        if !self.processors.contains_key(&State::root()) {
            return Err(ConfigError::MissingRoot);
        }
        Ok(ProcessorRegistry {
            processors: self.processors,
        })
    }
}
