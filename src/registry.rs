//! # Model registry
//!
//! Explicit factory map from model and architecture names to constructors. The registry is
//! populated once at start-up by calling `register_models`, then used to build models by
//! architecture name:
//!
//! ```no_run
//! use rust_squad::language_model::CheckpointLoader;
//! use rust_squad::registry::ModelRegistry;
//! use rust_squad::squad::FinetuningSquadConfig;
//! use rust_squad::Dictionary;
//! use tch::{nn, Device};
//!
//! # fn main() -> Result<(), rust_squad::RustSquadError> {
//! let registry = ModelRegistry::with_defaults()?;
//! let dictionary = Dictionary::load("path/to/dict.txt")?;
//! let vs = nn::VarStore::new(Device::Cpu);
//! let config = FinetuningSquadConfig {
//!     lm_path: Some("path/to/lm".to_string()),
//!     ..Default::default()
//! };
//! let model = registry.build(
//!     "finetuning_squad",
//!     &vs,
//!     &config,
//!     &dictionary,
//!     &CheckpointLoader,
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::language_model::LanguageModelLoader;
use crate::squad::{base_architecture, FinetuningSquad, FinetuningSquadConfig};
use crate::{Dictionary, RustSquadError};
use std::collections::HashMap;
use tch::nn;
use tracing::debug;

/// Name of the SQuAD fine-tuning model and of its default architecture
pub const FINETUNING_SQUAD: &str = "finetuning_squad";

/// Fills architecture-specific defaults in a configuration
pub type ArchitectureFn = fn(&mut FinetuningSquadConfig);

/// Builds a model from a configuration, a dictionary and a language model loader
pub type ModelBuilder = fn(
    &nn::VarStore,
    &FinetuningSquadConfig,
    &Dictionary,
    &dyn LanguageModelLoader,
) -> Result<FinetuningSquad, RustSquadError>;

#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelBuilder>,
    architectures: HashMap<String, (String, ArchitectureFn)>,
}

impl ModelRegistry {
    pub fn new() -> ModelRegistry {
        ModelRegistry::default()
    }

    /// Registry holding every model of the crate (see `register_models`).
    pub fn with_defaults() -> Result<ModelRegistry, RustSquadError> {
        let mut registry = ModelRegistry::new();
        register_models(&mut registry)?;
        Ok(registry)
    }

    pub fn register_model(
        &mut self,
        name: &str,
        builder: ModelBuilder,
    ) -> Result<(), RustSquadError> {
        if self.models.contains_key(name) {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "Cannot register duplicate model ({})",
                name
            )));
        }
        debug!("registering model {}", name);
        self.models.insert(name.to_string(), builder);
        Ok(())
    }

    /// Registers an architecture of an already registered model.
    pub fn register_architecture(
        &mut self,
        model_name: &str,
        architecture_name: &str,
        architecture: ArchitectureFn,
    ) -> Result<(), RustSquadError> {
        if !self.models.contains_key(model_name) {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "Cannot register model architecture for unknown model type ({})",
                model_name
            )));
        }
        if self.architectures.contains_key(architecture_name) {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "Cannot register duplicate model architecture ({})",
                architecture_name
            )));
        }
        debug!(
            "registering architecture {} of model {}",
            architecture_name, model_name
        );
        self.architectures.insert(
            architecture_name.to_string(),
            (model_name.to_string(), architecture),
        );
        Ok(())
    }

    /// Model name an architecture belongs to
    pub fn model_name(&self, architecture_name: &str) -> Option<&str> {
        self.architectures
            .get(architecture_name)
            .map(|(model_name, _)| model_name.as_str())
    }

    /// Sorted names of the registered architectures
    pub fn architectures(&self) -> Vec<&str> {
        let mut names = self
            .architectures
            .keys()
            .map(|name| name.as_str())
            .collect::<Vec<&str>>();
        names.sort_unstable();
        names
    }

    /// Applies the architecture defaults to a copy of `config` and builds the matching model.
    pub fn build(
        &self,
        architecture_name: &str,
        vs: &nn::VarStore,
        config: &FinetuningSquadConfig,
        dictionary: &Dictionary,
        loader: &dyn LanguageModelLoader,
    ) -> Result<FinetuningSquad, RustSquadError> {
        let (model_name, architecture) =
            self.architectures.get(architecture_name).ok_or_else(|| {
                RustSquadError::InvalidConfigurationError(format!(
                    "Unknown model architecture ({}), available: {:?}",
                    architecture_name,
                    self.architectures()
                ))
            })?;
        let builder = self.models.get(model_name).ok_or_else(|| {
            RustSquadError::InvalidConfigurationError(format!(
                "Unknown model type ({})",
                model_name
            ))
        })?;

        let mut config = config.clone();
        architecture(&mut config);
        builder(vs, &config, dictionary, loader)
    }
}

/// Registers the models and architectures provided by this crate.
pub fn register_models(registry: &mut ModelRegistry) -> Result<(), RustSquadError> {
    registry.register_model(FINETUNING_SQUAD, FinetuningSquad::build_model)?;
    registry.register_architecture(FINETUNING_SQUAD, FINETUNING_SQUAD, base_architecture)?;
    Ok(())
}
