// Copyright 2019-present, the HuggingFace Inc. team, The Google AI Language Team and Facebook, Inc.
// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::dropout::Dropout;
use crate::language_model::config::TransformerLanguageModelConfig;
use crate::language_model::embeddings::{
    CharacterTokenEmbedder, PositionalEmbedding, TokenEmbedder,
};
use crate::language_model::transformer::TransformerLayer;
use crate::language_model::{
    FreezableEmbedding, LanguageModel, LanguageModelLoader, LanguageModelOutput,
    LanguageModelOverrides,
};
use crate::{Config, Dictionary, RustSquadError};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tch::{nn, no_grad, Kind, Tensor};
use tracing::debug;

/// Name of the configuration file in a checkpoint directory
pub const CONFIG_FILE_NAME: &str = "config.json";
/// Name of the weights file in a checkpoint directory
pub const WEIGHTS_FILE_NAME: &str = "model.ot";

/// # Transformer language model
/// Bidirectional transformer encoder over token embeddings (lookup table or character
/// convolutions) and learned positions. When built with an output head, the primary output
/// holds the vocabulary logits; without it, the final hidden states.
pub struct TransformerLanguageModel {
    embed_tokens: TokenEmbedder,
    embed_positions: PositionalEmbedding,
    dropout: Dropout,
    layers: Vec<TransformerLayer>,
    layer_norm: nn::LayerNorm,
    output_projection: Option<nn::Linear>,
    padding_idx: i64,
    embed_dim: i64,
    output_hidden_states: bool,
}

impl TransformerLanguageModel {
    /// Build a new `TransformerLanguageModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the language model
    /// * `config` - `TransformerLanguageModelConfig` object defining the model architecture
    /// * `dictionary` - `Dictionary` providing the padding id and, for character embeddings, the symbols
    /// * `remove_head` - do not build the projection to the vocabulary
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_squad::language_model::{TransformerLanguageModel, TransformerLanguageModelConfig};
    /// use rust_squad::{Config, Dictionary};
    /// use tch::{nn, Device};
    ///
    /// let config = TransformerLanguageModelConfig::from_file("path/to/config.json").unwrap();
    /// let dictionary = Dictionary::load("path/to/dict.txt").unwrap();
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let model =
    ///     TransformerLanguageModel::new(&vs.root() / "language_model", &config, &dictionary, true)
    ///         .unwrap();
    /// ```
    pub fn new<'p, P>(
        p: P,
        config: &TransformerLanguageModelConfig,
        dictionary: &Dictionary,
        remove_head: bool,
    ) -> Result<TransformerLanguageModel, RustSquadError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        if config.embed_dim % config.attention_heads != 0 {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "embed_dim ({}) must be a multiple of attention_heads ({})",
                config.embed_dim, config.attention_heads
            )));
        }
        if (dictionary.len() as i64) > config.vocab_size {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "Dictionary holds {} symbols but the model vocabulary size is {}",
                dictionary.len(),
                config.vocab_size
            )));
        }

        let embed_tokens = match &config.character_embeddings {
            Some(char_config) => TokenEmbedder::Character(CharacterTokenEmbedder::new(
                p / "embed_tokens",
                dictionary,
                config.vocab_size,
                char_config,
                config.embed_dim,
            )?),
            None => {
                let embedding_config = nn::EmbeddingConfig {
                    padding_idx: dictionary.pad(),
                    ..Default::default()
                };
                TokenEmbedder::Lookup(nn::embedding(
                    p / "embed_tokens",
                    config.vocab_size,
                    config.embed_dim,
                    embedding_config,
                ))
            }
        };
        let embed_positions = PositionalEmbedding::new(
            p / "embed_positions",
            config.max_positions,
            config.embed_dim,
        );

        let p_layers = p / "layers";
        let layers = (0..config.layers)
            .map(|layer_index| TransformerLayer::new(&p_layers / layer_index, config))
            .collect::<Vec<TransformerLayer>>();

        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps.unwrap_or(1e-5),
            ..Default::default()
        };
        let layer_norm =
            nn::layer_norm(p / "layer_norm", vec![config.embed_dim], layer_norm_config);

        let output_projection = if remove_head {
            None
        } else {
            Some(nn::linear(
                p / "output_projection",
                config.embed_dim,
                config.vocab_size,
                Default::default(),
            ))
        };

        Ok(TransformerLanguageModel {
            embed_tokens,
            embed_positions,
            dropout: Dropout::new(config.dropout),
            layers,
            layer_norm,
            output_projection,
            padding_idx: dictionary.pad(),
            embed_dim: config.embed_dim,
            output_hidden_states: config.output_hidden_states.unwrap_or(false),
        })
    }

    pub fn has_head(&self) -> bool {
        self.output_projection.is_some()
    }
}

impl LanguageModel for TransformerLanguageModel {
    fn forward_t(
        &self,
        input_ids: &Tensor,
        train: bool,
    ) -> Result<LanguageModelOutput, RustSquadError> {
        if input_ids.dim() != 2 {
            return Err(RustSquadError::ValueError(format!(
                "Expected input ids of shape (batch size, sequence length), got {:?}",
                input_ids.size()
            )));
        }
        let padding_mask = input_ids.eq(self.padding_idx);
        let non_padding = padding_mask.logical_not().unsqueeze(-1).to_kind(Kind::Float);

        let embeddings = self.embed_tokens.forward(input_ids)
            + self.embed_positions.forward(input_ids)?;
        let mut hidden_state = embeddings.apply_t(&self.dropout, train) * &non_padding;

        let mut all_hidden_states: Option<Vec<Tensor>> = if self.output_hidden_states {
            Some(vec![])
        } else {
            None
        };

        for layer in &self.layers {
            if let Some(hidden_states) = all_hidden_states.as_mut() {
                hidden_states.push(hidden_state.shallow_clone());
            }
            hidden_state =
                layer.forward_t(&hidden_state, Some(&padding_mask), train) * &non_padding;
        }
        let hidden_state = hidden_state.apply(&self.layer_norm);
        if let Some(hidden_states) = all_hidden_states.as_mut() {
            hidden_states.push(hidden_state.shallow_clone());
        }

        let hidden_state = match &self.output_projection {
            Some(projection) => hidden_state.apply(projection),
            None => hidden_state,
        };

        Ok(LanguageModelOutput {
            hidden_state,
            all_hidden_states,
        })
    }

    fn embed_dim(&self) -> i64 {
        self.embed_dim
    }

    fn freezable_embedding(&mut self) -> Option<&mut dyn FreezableEmbedding> {
        match &mut self.embed_tokens {
            TokenEmbedder::Character(embedder) => Some(embedder),
            TokenEmbedder::Lookup(_) => None,
        }
    }
}

/// # Loader for checkpoint directories
/// A checkpoint directory holds a `config.json` file deserializing to a
/// `TransformerLanguageModelConfig` and a `model.ot` weights file whose tensor names are
/// relative to the language model root.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckpointLoader;

impl CheckpointLoader {
    /// Writes the configuration and the variables found under `prefix` to `directory`.
    pub fn save<P: AsRef<Path>>(
        vs: &nn::VarStore,
        prefix: &str,
        config: &TransformerLanguageModelConfig,
        directory: P,
    ) -> Result<(), RustSquadError> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        let writer = BufWriter::new(File::create(directory.join(CONFIG_FILE_NAME))?);
        serde_json::to_writer_pretty(writer, config)?;

        let variable_prefix = format!("{}.", prefix);
        let named_tensors = vs
            .variables()
            .into_iter()
            .filter_map(|(name, tensor)| {
                name.strip_prefix(variable_prefix.as_str())
                    .map(|relative_name| (relative_name.to_string(), tensor))
            })
            .collect::<Vec<(String, Tensor)>>();
        Tensor::save_multi(&named_tensors, directory.join(WEIGHTS_FILE_NAME))?;
        debug!(
            "saved {} tensors to {}",
            named_tensors.len(),
            directory.display()
        );
        Ok(())
    }

    /// Copies the checkpoint tensors into `variables`, the variables created for the model
    /// rooted at `prefix`. Every variable must be found in the checkpoint with a matching shape.
    fn load_weights(
        prefix: &str,
        variables: Vec<(String, Tensor)>,
        weights_path: &Path,
    ) -> Result<(), RustSquadError> {
        let named_tensors = Tensor::load_multi(weights_path)?
            .into_iter()
            .collect::<HashMap<String, Tensor>>();
        let variable_prefix = format!("{}.", prefix);

        let mut missing = vec![];
        let mut loaded = 0;
        for (name, mut variable) in variables {
            let value = checkpoint_name(&name, &variable_prefix)
                .and_then(|relative_name| named_tensors.get(relative_name));
            match value {
                Some(value) => {
                    if variable.size() != value.size() {
                        return Err(RustSquadError::ValueError(format!(
                            "Shape mismatch for {}: expected {:?}, found {:?} in {}",
                            name,
                            variable.size(),
                            value.size(),
                            weights_path.display()
                        )));
                    }
                    no_grad(|| variable.f_copy_(value))?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(RustSquadError::TchError(format!(
                "cannot find the tensors {:?} in {}",
                missing,
                weights_path.display()
            )));
        }
        debug!("loaded {} tensors from {}", loaded, weights_path.display());
        Ok(())
    }
}

/// Checkpoint tensor name of a variable created under `variable_prefix`. The variable store
/// renames variables created twice under the same path to `name__N`; the suffix is dropped.
fn checkpoint_name<'a>(variable_name: &'a str, variable_prefix: &str) -> Option<&'a str> {
    let relative_name = variable_name.strip_prefix(variable_prefix)?;
    match relative_name.rfind("__") {
        Some(position)
            if position + 2 < relative_name.len()
                && relative_name[position + 2..]
                    .chars()
                    .all(|c| c.is_ascii_digit()) =>
        {
            Some(&relative_name[..position])
        }
        _ => Some(relative_name),
    }
}

impl LanguageModelLoader for CheckpointLoader {
    fn load(
        &self,
        vs: &nn::VarStore,
        prefix: &str,
        paths: &[PathBuf],
        dictionary: &Dictionary,
        overrides: &LanguageModelOverrides,
    ) -> Result<Vec<Box<dyn LanguageModel>>, RustSquadError> {
        let mut models: Vec<Box<dyn LanguageModel>> = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let mut config =
                TransformerLanguageModelConfig::from_file(path.join(CONFIG_FILE_NAME))?;
            if let Some(dropout) = overrides.dropout {
                config.dropout = dropout;
            }
            if let Some(attention_dropout) = overrides.attention_dropout {
                config.attention_dropout = attention_dropout;
            }
            if let Some(relu_dropout) = overrides.relu_dropout {
                config.relu_dropout = relu_dropout;
            }

            let model_prefix = if index == 0 {
                prefix.to_string()
            } else {
                format!("{}_{}", prefix, index)
            };
            debug!(
                "loading language model {} from {} into {}",
                index,
                path.display(),
                model_prefix
            );
            let existing = vs.variables().keys().cloned().collect::<HashSet<String>>();
            let model = TransformerLanguageModel::new(
                &vs.root() / model_prefix.as_str(),
                &config,
                dictionary,
                overrides.remove_head,
            )?;
            let created = vs
                .variables()
                .into_iter()
                .filter(|(name, _)| !existing.contains(name))
                .collect::<Vec<(String, Tensor)>>();
            Self::load_weights(&model_prefix, created, &path.join(WEIGHTS_FILE_NAME))?;
            models.push(Box::new(model));
        }
        Ok(models)
    }
}
