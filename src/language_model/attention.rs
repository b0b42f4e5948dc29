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
use std::borrow::Borrow;
use tch::{nn, Tensor};

#[derive(Debug)]
pub struct MultiheadSelfAttention {
    num_heads: i64,
    head_dim: i64,
    dropout: Dropout,
    q_proj: nn::Linear,
    k_proj: nn::Linear,
    v_proj: nn::Linear,
    out_proj: nn::Linear,
}

impl MultiheadSelfAttention {
    pub fn new<'p, P>(p: P, config: &TransformerLanguageModelConfig) -> MultiheadSelfAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        assert_eq!(
            config.embed_dim % config.attention_heads,
            0,
            "Embedding dimension not a multiple of the number of attention heads"
        );
        let p = p.borrow();

        let q_proj = nn::linear(
            p / "q_proj",
            config.embed_dim,
            config.embed_dim,
            Default::default(),
        );
        let k_proj = nn::linear(
            p / "k_proj",
            config.embed_dim,
            config.embed_dim,
            Default::default(),
        );
        let v_proj = nn::linear(
            p / "v_proj",
            config.embed_dim,
            config.embed_dim,
            Default::default(),
        );
        let out_proj = nn::linear(
            p / "out_proj",
            config.embed_dim,
            config.embed_dim,
            Default::default(),
        );

        MultiheadSelfAttention {
            num_heads: config.attention_heads,
            head_dim: config.embed_dim / config.attention_heads,
            dropout: Dropout::new(config.attention_dropout),
            q_proj,
            k_proj,
            v_proj,
            out_proj,
        }
    }

    fn split_heads(&self, x: Tensor, bs: i64) -> Tensor {
        x.view([bs, -1, self.num_heads, self.head_dim])
            .transpose(1, 2)
    }

    fn flatten(&self, x: Tensor, bs: i64) -> Tensor {
        x.transpose(1, 2)
            .contiguous()
            .view([bs, -1, self.num_heads * self.head_dim])
    }

    /// # Arguments
    ///
    /// * `hidden_states` - input tensor of shape (*batch size*, *sequence_length*, *embed_dim*)
    /// * `padding_mask` - Optional boolean mask of shape (*batch size*, *sequence_length*), `true` for padding positions
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let bs = hidden_states.size()[0];

        let query = self.split_heads(hidden_states.apply(&self.q_proj), bs);
        let key = self.split_heads(hidden_states.apply(&self.k_proj), bs);
        let value = self.split_heads(hidden_states.apply(&self.v_proj), bs);
        let query: Tensor = query / (self.head_dim as f64).sqrt();

        let scores = query.matmul(&key.transpose(-1, -2));
        let scores = match padding_mask {
            Some(mask) => scores.masked_fill(&mask.unsqueeze(1).unsqueeze(2), f64::NEG_INFINITY),
            None => scores,
        };

        let weights = scores
            .softmax(-1, scores.kind())
            .apply_t(&self.dropout, train);
        self.flatten(weights.matmul(&value), bs)
            .apply(&self.out_proj)
    }
}
