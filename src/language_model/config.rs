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

use crate::common::Activation;
use crate::Config;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # Character convolution embedder configuration
/// Tokens are spelled out into at most `max_char_len` characters, embedded and convolved
/// with one filter bank per `(width, output_channels)` entry of `filters`.
pub struct CharacterEmbeddingsConfig {
    pub char_embed_dim: i64,
    pub filters: Vec<(i64, i64)>,
    pub highway_layers: i64,
    pub max_char_len: i64,
}

impl Default for CharacterEmbeddingsConfig {
    fn default() -> Self {
        CharacterEmbeddingsConfig {
            char_embed_dim: 16,
            filters: vec![(1, 64), (2, 128), (3, 192), (4, 256), (5, 256), (6, 512), (7, 1024)],
            highway_layers: 2,
            max_char_len: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # Transformer language model configuration
/// Defines the language model architecture (e.g. number of layers, hidden layer size, dropouts...)
pub struct TransformerLanguageModelConfig {
    pub vocab_size: i64,
    pub embed_dim: i64,
    pub ffn_embed_dim: i64,
    pub layers: i64,
    pub attention_heads: i64,
    pub max_positions: i64,
    pub dropout: f64,
    pub attention_dropout: f64,
    pub relu_dropout: f64,
    pub activation: Option<Activation>,
    pub layer_norm_eps: Option<f64>,
    pub character_embeddings: Option<CharacterEmbeddingsConfig>,
    pub output_hidden_states: Option<bool>,
}

impl Config for TransformerLanguageModelConfig {}

impl Default for TransformerLanguageModelConfig {
    fn default() -> Self {
        TransformerLanguageModelConfig {
            vocab_size: 32000,
            embed_dim: 1024,
            ffn_embed_dim: 4096,
            layers: 12,
            attention_heads: 16,
            max_positions: 512,
            dropout: 0.1,
            attention_dropout: 0.1,
            relu_dropout: 0.05,
            activation: Some(Activation::relu),
            layer_norm_eps: Some(1e-5),
            character_embeddings: None,
            output_hidden_states: None,
        }
    }
}
