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
use crate::common::linear::{projection, Projection};
use crate::language_model::{LanguageModel, LanguageModelLoader, LanguageModelOverrides};
use crate::{Config, Dictionary, RustSquadError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::path::PathBuf;
use tch::{nn, Tensor};
use tracing::{debug, info};

pub const DEFAULT_MODEL_DIM: i64 = 1024;
pub const DEFAULT_LAST_DROPOUT: f64 = 0.1;
pub const DEFAULT_MODEL_DROPOUT: f64 = 0.1;
pub const DEFAULT_ATTENTION_DROPOUT: f64 = 0.1;
pub const DEFAULT_RELU_DROPOUT: f64 = 0.05;

/// Prefix of the language model variables in the variable store
pub const LANGUAGE_MODEL_PREFIX: &str = "language_model";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
/// # SQuAD fine-tuning configuration
/// Fields left to `None` are filled by `base_architecture`.
pub struct FinetuningSquadConfig {
    /// Path to the pretrained language model checkpoint
    pub lm_path: Option<String>,
    /// Dimension of the language model hidden states
    pub model_dim: Option<i64>,
    /// Dropout applied to the hidden states before the projections
    pub last_dropout: Option<f64>,
    /// Dropout of the language model
    pub model_dropout: Option<f64>,
    /// Attention dropout of the language model
    pub attention_dropout: Option<f64>,
    /// Activation dropout of the language model feed-forward blocks
    pub relu_dropout: Option<f64>,
}

impl Config for FinetuningSquadConfig {}

/// Fills the unset fields of the configuration with the default architecture values.
/// Fields already set are left untouched, applying it several times is a no-op.
pub fn base_architecture(config: &mut FinetuningSquadConfig) {
    config.model_dim.get_or_insert(DEFAULT_MODEL_DIM);
    config.last_dropout.get_or_insert(DEFAULT_LAST_DROPOUT);
    config.model_dropout.get_or_insert(DEFAULT_MODEL_DROPOUT);
    config
        .attention_dropout
        .get_or_insert(DEFAULT_ATTENTION_DROPOUT);
    config.relu_dropout.get_or_insert(DEFAULT_RELU_DROPOUT);
}

/// Container for the SQuAD fine-tuning model output.
pub struct SquadModelOutput {
    /// Answerable/impossible logits of shape (*batch size*, 2)
    pub imp_logits: Tensor,
    /// Start position logits of shape (*batch size*, *sequence_length*, 2)
    pub start_logits: Tensor,
    /// End position logits of shape (*batch size*, *sequence_length*, 2)
    pub end_logits: Tensor,
}

/// # Extractive question answering head
/// Wraps a pretrained language model and predicts, for every token, whether it starts or
/// ends the answer span, and for every sequence whether the question can be answered.
/// It is made of the following blocks:
/// - `language_model`: pretrained `LanguageModel` producing the hidden states
/// - `last_dropout`: dropout applied to the hidden states
/// - `start_proj`, `end_proj`: per-token projections to 2 logits
/// - `imp_proj`: projection of the concatenated hidden states found at the 3 end-of-sentence markers of each sequence
///
/// Input sequences are expected to contain exactly three end-of-sentence tokens
/// (e.g. `question </s> passage </s> </s>`). This is not checked: a batch with a different
/// total number of markers fails with a `TchError` when the marker embeddings are reshaped.
pub struct FinetuningSquad {
    language_model: Box<dyn LanguageModel>,
    eos_idx: i64,
    pad_idx: i64,
    unk_idx: i64,
    last_dropout: Dropout,
    start_proj: Projection,
    end_proj: Projection,
    imp_proj: Projection,
}

impl FinetuningSquad {
    /// Build a new `FinetuningSquad` head around an already loaded language model
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the head projections
    /// * `config` - `FinetuningSquadConfig` (unset fields use the `base_architecture` values)
    /// * `language_model` - pretrained `LanguageModel`
    /// * `eos_idx`, `pad_idx`, `unk_idx` - special token ids of the dictionary
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_squad::language_model::{TransformerLanguageModel, TransformerLanguageModelConfig};
    /// use rust_squad::squad::{FinetuningSquad, FinetuningSquadConfig};
    /// use rust_squad::{Config, Dictionary};
    /// use tch::{nn, Device};
    ///
    /// # fn main() -> Result<(), rust_squad::RustSquadError> {
    /// let dictionary = Dictionary::load("path/to/dict.txt")?;
    /// let lm_config = TransformerLanguageModelConfig::from_file("path/to/lm/config.json")?;
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let language_model =
    ///     TransformerLanguageModel::new(&vs.root() / "language_model", &lm_config, &dictionary, true)?;
    /// let config = FinetuningSquadConfig {
    ///     model_dim: Some(lm_config.embed_dim),
    ///     ..Default::default()
    /// };
    /// let model = FinetuningSquad::new(
    ///     vs.root(),
    ///     &config,
    ///     Box::new(language_model),
    ///     dictionary.eos(),
    ///     dictionary.pad(),
    ///     dictionary.unk(),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(
        p: P,
        config: &FinetuningSquadConfig,
        mut language_model: Box<dyn LanguageModel>,
        eos_idx: i64,
        pad_idx: i64,
        unk_idx: i64,
    ) -> Result<FinetuningSquad, RustSquadError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let model_dim = config.model_dim.unwrap_or(DEFAULT_MODEL_DIM);
        if language_model.embed_dim() != model_dim {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "model_dim ({}) does not match the language model dimension ({})",
                model_dim,
                language_model.embed_dim()
            )));
        }

        let last_dropout = Dropout::new(config.last_dropout.unwrap_or(DEFAULT_LAST_DROPOUT));
        let start_proj = projection(p / "start_proj", model_dim, 2, Default::default());
        let end_proj = projection(p / "end_proj", model_dim, 2, Default::default());
        let imp_proj = projection(p / "imp_proj", model_dim * 3, 2, Default::default());

        if let Some(embedder) = language_model.freezable_embedding() {
            info!("disabling training of the character convolutions");
            embedder.disable_convolutional_grads();
        }

        let mut model = FinetuningSquad {
            language_model,
            eos_idx,
            pad_idx,
            unk_idx,
            last_dropout,
            start_proj,
            end_proj,
            imp_proj,
        };
        model.reset_parameters();
        Ok(model)
    }

    /// Loads the pretrained language model referenced by `config.lm_path` and builds the head.
    ///
    /// The language model is created under `language_model` in the variable store, the head
    /// projections at its root. The architecture defaults are applied to a copy of `config`.
    ///
    /// # Errors
    ///
    /// * `InvalidConfigurationError` if `lm_path` is not set. Nothing is loaded or allocated.
    /// * `EnsembleNotSupported` if the loader returns more than one language model.
    ///
    /// Variables created before an error stay in `vs`. Building again in the same store
    /// creates and loads a new set of variables.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_squad::language_model::CheckpointLoader;
    /// use rust_squad::squad::{FinetuningSquad, FinetuningSquadConfig};
    /// use rust_squad::Dictionary;
    /// use tch::{nn, Device};
    ///
    /// # fn main() -> Result<(), rust_squad::RustSquadError> {
    /// let dictionary = Dictionary::load("path/to/dict.txt")?;
    /// let vs = nn::VarStore::new(Device::cuda_if_available());
    /// let config = FinetuningSquadConfig {
    ///     lm_path: Some("path/to/lm".to_string()),
    ///     ..Default::default()
    /// };
    /// let model = FinetuningSquad::build_model(&vs, &config, &dictionary, &CheckpointLoader)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn build_model(
        vs: &nn::VarStore,
        config: &FinetuningSquadConfig,
        dictionary: &Dictionary,
        loader: &dyn LanguageModelLoader,
    ) -> Result<FinetuningSquad, RustSquadError> {
        let mut config = config.clone();
        base_architecture(&mut config);

        let lm_path = config.lm_path.as_ref().ok_or_else(|| {
            RustSquadError::InvalidConfigurationError(
                "a pretrained language model path (lm_path) is required".into(),
            )
        })?;

        let overrides = LanguageModelOverrides {
            remove_head: true,
            dropout: config.model_dropout,
            attention_dropout: config.attention_dropout,
            relu_dropout: config.relu_dropout,
        };
        debug!("loading pretrained language model from {}", lm_path);
        let mut models = loader.load(
            vs,
            LANGUAGE_MODEL_PREFIX,
            &[PathBuf::from(lm_path)],
            dictionary,
            &overrides,
        )?;
        if models.len() != 1 {
            return Err(RustSquadError::EnsembleNotSupported(models.len()));
        }
        let language_model = models.remove(0);

        FinetuningSquad::new(
            vs.root(),
            &config,
            language_model,
            dictionary.eos(),
            dictionary.pad(),
            dictionary.unk(),
        )
    }

    /// Sets the weights and biases of the three projections to 0, so that an untrained head
    /// outputs 0 for every logit.
    pub fn reset_parameters(&mut self) {
        self.start_proj.fill_constant(0.);
        self.end_proj.fill_constant(0.);
        self.imp_proj.fill_constant(0.);
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `text` - Input tensor of shape (*batch size*, *sequence_length*), each sequence holding exactly 3 end-of-sentence tokens
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `SquadModelOutput` containing:
    ///   - `imp_logits` - `Tensor` of shape (*batch size*, 2)
    ///   - `start_logits` - `Tensor` of shape (*batch size*, *sequence_length*, 2)
    ///   - `end_logits` - `Tensor` of shape (*batch size*, *sequence_length*, 2)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rust_squad::language_model::CheckpointLoader;
    /// # use rust_squad::squad::{FinetuningSquad, FinetuningSquadConfig};
    /// # use rust_squad::Dictionary;
    /// # use tch::{nn, no_grad, Device, Tensor};
    /// # fn main() -> Result<(), rust_squad::RustSquadError> {
    /// # let dictionary = Dictionary::load("path/to/dict.txt")?;
    /// # let vs = nn::VarStore::new(Device::Cpu);
    /// # let config = FinetuningSquadConfig {
    /// #     lm_path: Some("path/to/lm".to_string()),
    /// #     ..Default::default()
    /// # };
    /// # let model = FinetuningSquad::build_model(&vs, &config, &dictionary, &CheckpointLoader)?;
    /// let question = dictionary.encode_line("who wrote it ?", true);
    /// let passage = dictionary.encode_line("it was written by someone", true);
    /// let input = Tensor::cat(&[question, passage, Tensor::of_slice(&[dictionary.eos()])], 0)
    ///     .unsqueeze(0);
    ///
    /// let model_output = no_grad(|| model.forward_t(&input, false))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn forward_t(
        &self,
        text: &Tensor,
        train: bool,
    ) -> Result<SquadModelOutput, RustSquadError> {
        let hidden_state = self.language_model.forward_t(text, train)?.hidden_state;

        let eos_mask = text.eq(self.eos_idx);
        let hidden_state = hidden_state.apply_t(&self.last_dropout, train);

        let (batch_size, _, hidden_dim) = hidden_state.size3()?;
        let eos_embeddings = hidden_state
            .masked_select(&eos_mask.unsqueeze(-1).expand_as(&hidden_state))
            .f_view([batch_size, 1, 3 * hidden_dim])?;

        let imp_logits = eos_embeddings.apply(&self.imp_proj).squeeze_dim(1);
        let start_logits = hidden_state.apply(&self.start_proj);
        let end_logits = hidden_state.apply(&self.end_proj);

        Ok(SquadModelOutput {
            imp_logits,
            start_logits,
            end_logits,
        })
    }

    pub fn eos_idx(&self) -> i64 {
        self.eos_idx
    }

    pub fn pad_idx(&self) -> i64 {
        self.pad_idx
    }

    pub fn unk_idx(&self) -> i64 {
        self.unk_idx
    }

    pub fn language_model(&self) -> &dyn LanguageModel {
        self.language_model.as_ref()
    }
}
