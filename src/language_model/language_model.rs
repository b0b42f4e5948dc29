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

use crate::{Dictionary, RustSquadError};
use std::path::PathBuf;
use tch::{nn, Tensor};

/// Container for the language model output.
pub struct LanguageModelOutput {
    /// Primary output of shape (*batch size*, *sequence_length*, *embed_dim*)
    pub hidden_state: Tensor,
    /// Auxiliary outputs: hidden states for all intermediate layers
    pub all_hidden_states: Option<Vec<Tensor>>,
}

/// # Token embedder whose convolutional filters can be frozen
pub trait FreezableEmbedding {
    /// Stops gradient tracking on the convolution parameters. Other parameters are unaffected.
    fn disable_convolutional_grads(&mut self);
}

/// # Pretrained language model producing per-token hidden states
pub trait LanguageModel {
    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Input tensor of shape (*batch size*, *sequence_length*)
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    fn forward_t(
        &self,
        input_ids: &Tensor,
        train: bool,
    ) -> Result<LanguageModelOutput, RustSquadError>;

    /// Dimension of the hidden states returned by `forward_t`
    fn embed_dim(&self) -> i64;

    /// Token embedder supporting convolution freezing, if the model uses one.
    fn freezable_embedding(&mut self) -> Option<&mut dyn FreezableEmbedding> {
        None
    }
}

/// Options applied on top of a checkpoint configuration when loading it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanguageModelOverrides {
    /// Do not build the output projection to the vocabulary
    pub remove_head: bool,
    pub dropout: Option<f64>,
    pub attention_dropout: Option<f64>,
    pub relu_dropout: Option<f64>,
}

impl Default for LanguageModelOverrides {
    fn default() -> Self {
        LanguageModelOverrides {
            remove_head: false,
            dropout: None,
            attention_dropout: None,
            relu_dropout: None,
        }
    }
}

/// # Loads pretrained language models
/// Returns one model per path. The first model is built under `prefix` in the variable store,
/// additional ones under `{prefix}_{index}`, so that the loaded weights share the variable store
/// of the model they are attached to.
pub trait LanguageModelLoader {
    fn load(
        &self,
        vs: &nn::VarStore,
        prefix: &str,
        paths: &[PathBuf],
        dictionary: &Dictionary,
        overrides: &LanguageModelOverrides,
    ) -> Result<Vec<Box<dyn LanguageModel>>, RustSquadError>;
}
