//! # Pretrained language models
//!
//! Interface between the fine-tuning heads and the pretrained encoders they wrap.
//! Heads only depend on the `LanguageModel` trait: the model returns a `LanguageModelOutput`
//! whose primary `hidden_state` is always used, while auxiliary per-layer states are optional.
//! Models whose token embedder exposes frozen-able character convolutions advertise it through
//! `LanguageModel::freezable_embedding`.
//!
//! A reference implementation is provided:
//! - `TransformerLanguageModel`: transformer encoder over a lookup table or a character
//!   convolution token embedder (`CharacterTokenEmbedder`)
//! - `CheckpointLoader`: `LanguageModelLoader` reading checkpoint directories holding a
//!   `config.json` and a `model.ot` weights file
//!
//! ```no_run
//! use rust_squad::language_model::{CheckpointLoader, LanguageModelLoader, LanguageModelOverrides};
//! use rust_squad::Dictionary;
//! use std::path::PathBuf;
//! use tch::{nn, Device};
//!
//! # fn main() -> Result<(), rust_squad::RustSquadError> {
//! let dictionary = Dictionary::load("path/to/dict.txt")?;
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let overrides = LanguageModelOverrides {
//!     remove_head: true,
//!     ..Default::default()
//! };
//! let models = CheckpointLoader.load(
//!     &vs,
//!     "language_model",
//!     &[PathBuf::from("path/to/checkpoint")],
//!     &dictionary,
//!     &overrides,
//! )?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod config;
mod embeddings;
mod language_model;
mod transformer;
mod transformer_lm;

pub use config::{CharacterEmbeddingsConfig, TransformerLanguageModelConfig};
pub use embeddings::{CharacterTokenEmbedder, PositionalEmbedding, TokenEmbedder};
pub use language_model::{
    FreezableEmbedding, LanguageModel, LanguageModelLoader, LanguageModelOutput,
    LanguageModelOverrides,
};
pub use transformer::TransformerLayer;
pub use transformer_lm::{
    CheckpointLoader, TransformerLanguageModel, CONFIG_FILE_NAME, WEIGHTS_FILE_NAME,
};
