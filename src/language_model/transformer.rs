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
use crate::language_model::attention::MultiheadSelfAttention;
use crate::language_model::config::TransformerLanguageModelConfig;
use std::borrow::Borrow;
use tch::{nn, Tensor};

/// # Transformer layer
/// Self-attention block followed by a position-wise feed-forward block, each wrapped
/// with dropout, a residual connection and a layer normalization.
pub struct TransformerLayer {
    self_attn: MultiheadSelfAttention,
    self_attn_layer_norm: nn::LayerNorm,
    fc1: nn::Linear,
    fc2: nn::Linear,
    activation: fn(&Tensor) -> Tensor,
    final_layer_norm: nn::LayerNorm,
    dropout: Dropout,
    activation_dropout: Dropout,
}

impl TransformerLayer {
    /// Build a new `TransformerLayer`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the layer
    /// * `config` - `TransformerLanguageModelConfig` object defining the model architecture
    pub fn new<'p, P>(p: P, config: &TransformerLanguageModelConfig) -> TransformerLayer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let layer_norm_config = nn::LayerNormConfig {
            eps: config.layer_norm_eps.unwrap_or(1e-5),
            ..Default::default()
        };
        let self_attn = MultiheadSelfAttention::new(p / "self_attn", config);
        let self_attn_layer_norm = nn::layer_norm(
            p / "self_attn_layer_norm",
            vec![config.embed_dim],
            layer_norm_config,
        );
        let fc1 = nn::linear(
            p / "fc1",
            config.embed_dim,
            config.ffn_embed_dim,
            Default::default(),
        );
        let fc2 = nn::linear(
            p / "fc2",
            config.ffn_embed_dim,
            config.embed_dim,
            Default::default(),
        );
        let final_layer_norm = nn::layer_norm(
            p / "final_layer_norm",
            vec![config.embed_dim],
            layer_norm_config,
        );
        let activation = config.activation.unwrap_or_default().get_function();

        TransformerLayer {
            self_attn,
            self_attn_layer_norm,
            fc1,
            fc2,
            activation,
            final_layer_norm,
            dropout: Dropout::new(config.dropout),
            activation_dropout: Dropout::new(config.relu_dropout),
        }
    }

    /// Forward pass through the layer
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - input tensor of shape (*batch size*, *sequence_length*, *embed_dim*).
    /// * `padding_mask` - Optional boolean mask of shape (*batch size*, *sequence_length*), `true` for padding positions
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let attention_output = self
            .self_attn
            .forward_t(hidden_states, padding_mask, train)
            .apply_t(&self.dropout, train);
        let hidden_states: Tensor = hidden_states + attention_output;
        let hidden_states = hidden_states.apply(&self.self_attn_layer_norm);

        let ffn_output = (self.activation)(&hidden_states.apply(&self.fc1))
            .apply_t(&self.activation_dropout, train)
            .apply(&self.fc2)
            .apply_t(&self.dropout, train);
        let hidden_states: Tensor = hidden_states + ffn_output;
        hidden_states.apply(&self.final_layer_norm)
    }
}
