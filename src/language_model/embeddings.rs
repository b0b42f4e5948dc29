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

use crate::common::linear::{projection, Projection};
use crate::language_model::config::CharacterEmbeddingsConfig;
use crate::language_model::FreezableEmbedding;
use crate::{Dictionary, RustSquadError};
use std::borrow::Borrow;
use tch::nn::{EmbeddingConfig, Init};
use tch::{nn, Kind, Tensor};

const CHAR_PAD: i64 = 0;
const NUM_BYTES: i64 = 256;
const BEGIN_OF_WORD: i64 = NUM_BYTES + 1;
const END_OF_WORD: i64 = NUM_BYTES + 2;
const FIRST_SPECIAL: i64 = NUM_BYTES + 3;

#[derive(Debug)]
struct CharConvolution {
    ws: Tensor,
    bs: Tensor,
}

impl CharConvolution {
    fn new<'p, P>(p: P, in_channels: i64, out_channels: i64, width: i64) -> CharConvolution
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let fan_in = (in_channels * width) as f64;
        let bound = 1.0 / fan_in.sqrt();
        let ws = p.var(
            "weight",
            &[out_channels, in_channels, width],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        let bs = p.var(
            "bias",
            &[out_channels],
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        );
        CharConvolution { ws, bs }
    }

    fn forward(&self, chars: &Tensor) -> Tensor {
        chars.conv1d(&self.ws, Some(&self.bs), &[1], &[0], &[1], 1)
    }
}

#[derive(Debug)]
struct Highway {
    layers: Vec<Projection>,
    dim: i64,
}

impl Highway {
    fn new<'p, P>(p: P, dim: i64, num_layers: i64) -> Highway
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow() / "layers";
        let layers = (0..num_layers)
            .map(|i| projection(&p / i, dim, 2 * dim, Default::default()))
            .collect::<Vec<Projection>>();
        let mut highway = Highway { layers, dim };
        highway.reset_gate_bias();
        highway
    }

    // Gates start open towards the carry path.
    fn reset_gate_bias(&mut self) {
        let dim = self.dim;
        for layer in self.layers.iter_mut() {
            tch::no_grad(|| {
                let _ = layer.bs.narrow(0, dim, dim).fill_(1.0);
            });
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let mut x = x.shallow_clone();
        for layer in &self.layers {
            let projected = x.apply(layer);
            let chunks = projected.chunk(2, -1);
            let (nonlinear, gate) = (chunks[0].relu(), chunks[1].sigmoid());
            x = &gate * &x + (1.0 - &gate) * nonlinear;
        }
        x
    }
}

/// # Character-level token embedder
/// Spells every token of the dictionary into UTF-8 bytes, embeds the bytes and
/// runs a bank of 1-D convolutions of different widths, max-pooled over the characters.
/// The pooled features go through highway layers and a projection to the model dimension.
/// Special symbols of the dictionary are given dedicated character ids.
#[derive(Debug)]
pub struct CharacterTokenEmbedder {
    word_to_char: Tensor,
    char_embeddings: nn::Embedding,
    convolutions: Vec<CharConvolution>,
    highway: Highway,
    projection: Projection,
    embed_dim: i64,
}

impl CharacterTokenEmbedder {
    /// Build a new `CharacterTokenEmbedder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the embedder
    /// * `dictionary` - `Dictionary` holding the symbols to spell out
    /// * `vocab_size` - Number of token ids the embedder accepts (at least the dictionary length)
    /// * `config` - `CharacterEmbeddingsConfig` defining the convolution filters
    /// * `embed_dim` - Output dimension of the token embeddings
    pub fn new<'p, P>(
        p: P,
        dictionary: &Dictionary,
        vocab_size: i64,
        config: &CharacterEmbeddingsConfig,
        embed_dim: i64,
    ) -> Result<CharacterTokenEmbedder, RustSquadError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let max_width = config.filters.iter().map(|(w, _)| *w).max().unwrap_or(0);
        if config.filters.is_empty() || max_width > config.max_char_len {
            return Err(RustSquadError::InvalidConfigurationError(format!(
                "Character filters must be non-empty and no wider than max_char_len ({})",
                config.max_char_len
            )));
        }
        if config.max_char_len < 3 {
            return Err(RustSquadError::InvalidConfigurationError(
                "max_char_len must hold at least one character and the word boundaries".into(),
            ));
        }

        let word_to_char = Self::build_char_table(dictionary, vocab_size, config.max_char_len)
            .to_device(p.device());

        let num_chars = FIRST_SPECIAL + dictionary.len() as i64;
        let embedding_config = EmbeddingConfig {
            padding_idx: CHAR_PAD,
            ..Default::default()
        };
        let char_embeddings = nn::embedding(
            p / "char_embeddings",
            num_chars,
            config.char_embed_dim,
            embedding_config,
        );

        let convolutions = config
            .filters
            .iter()
            .enumerate()
            .map(|(i, (width, channels))| {
                CharConvolution::new(
                    &(p / "convolutions") / i,
                    config.char_embed_dim,
                    *channels,
                    *width,
                )
            })
            .collect::<Vec<CharConvolution>>();

        let total_filters: i64 = config.filters.iter().map(|(_, c)| *c).sum();
        let highway = Highway::new(p / "highway", total_filters, config.highway_layers);
        let projection = projection(
            p / "projection",
            total_filters,
            embed_dim,
            Default::default(),
        );

        Ok(CharacterTokenEmbedder {
            word_to_char,
            char_embeddings,
            convolutions,
            highway,
            projection,
            embed_dim,
        })
    }

    fn build_char_table(dictionary: &Dictionary, vocab_size: i64, max_char_len: i64) -> Tensor {
        let rows = vocab_size.max(dictionary.len() as i64);
        let max_bytes = (max_char_len - 2) as usize;
        let mut table = vec![CHAR_PAD; (rows * max_char_len) as usize];
        for (index, symbol) in dictionary.symbols().iter().enumerate() {
            let row = &mut table[index * max_char_len as usize..(index + 1) * max_char_len as usize];
            row[0] = BEGIN_OF_WORD;
            let mut position = 1;
            if dictionary.is_special(index as i64) {
                row[position] = FIRST_SPECIAL + index as i64;
                position += 1;
            } else {
                for byte in symbol.bytes().take(max_bytes) {
                    row[position] = byte as i64 + 1;
                    position += 1;
                }
            }
            row[position] = END_OF_WORD;
        }
        Tensor::of_slice(&table).view([rows, max_char_len])
    }

    pub fn convolution_parameters(&self) -> Vec<&Tensor> {
        self.convolutions
            .iter()
            .flat_map(|conv| vec![&conv.ws, &conv.bs])
            .collect()
    }

    pub fn forward(&self, input_ids: &Tensor) -> Tensor {
        let input_shape = input_ids.size();
        let flat_ids = input_ids.view([-1]);
        let chars = self.word_to_char.index_select(0, &flat_ids);
        // (tokens, char_embed_dim, max_char_len)
        let char_embeds = chars.apply(&self.char_embeddings).transpose(1, 2);

        let pooled = self
            .convolutions
            .iter()
            .map(|conv| conv.forward(&char_embeds).max_dim(-1, false).0.relu())
            .collect::<Vec<Tensor>>();
        let features = Tensor::cat(&pooled, -1);

        let token_embeds = self.highway.forward(&features).apply(&self.projection);
        let mut output_shape = input_shape;
        output_shape.push(self.embed_dim);
        token_embeds.view(output_shape.as_slice())
    }
}

impl FreezableEmbedding for CharacterTokenEmbedder {
    fn disable_convolutional_grads(&mut self) {
        for conv in &self.convolutions {
            let _ = conv.ws.set_requires_grad(false);
            let _ = conv.bs.set_requires_grad(false);
        }
    }
}

/// # Token embedding layer
/// Either a lookup table or a character convolution embedder.
pub enum TokenEmbedder {
    Lookup(nn::Embedding),
    Character(CharacterTokenEmbedder),
}

impl TokenEmbedder {
    pub fn forward(&self, input_ids: &Tensor) -> Tensor {
        match self {
            TokenEmbedder::Lookup(embeddings) => input_ids.apply(embeddings),
            TokenEmbedder::Character(embedder) => embedder.forward(input_ids),
        }
    }
}

/// # Learned positional embeddings
pub struct PositionalEmbedding {
    embeddings: nn::Embedding,
    max_positions: i64,
}

impl PositionalEmbedding {
    pub fn new<'p, P>(p: P, max_positions: i64, embed_dim: i64) -> PositionalEmbedding
    where
        P: Borrow<nn::Path<'p>>,
    {
        let embeddings = nn::embedding(p, max_positions, embed_dim, Default::default());
        PositionalEmbedding {
            embeddings,
            max_positions,
        }
    }

    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor, RustSquadError> {
        let size = input_ids.size();
        let (batch_size, sequence_length) = (size[0], size[1]);
        if sequence_length > self.max_positions {
            return Err(RustSquadError::ValueError(format!(
                "Sequence length {} exceeds the maximum number of positions {}",
                sequence_length, self.max_positions
            )));
        }
        let positions = Tensor::arange(sequence_length, (Kind::Int64, input_ids.device()))
            .unsqueeze(0)
            .expand(&[batch_size, sequence_length], true);
        Ok(positions.apply(&self.embeddings))
    }
}
