//! Extractive question answering heads for pretrained transformer language models.
//!
//! The crate provides a SQuAD fine-tuning head (`squad::FinetuningSquad`) predicting answer
//! spans and unanswerable questions from the hidden states of a pretrained language model.
//! The head relies on [tch-rs](https://github.com/LaurentMazare/tch-rs) for bindings to the
//! C++ Libtorch API.
//!
//! - `squad`: the fine-tuning head, its configuration and default architecture
//! - `language_model`: the language model interface used by the head, with a reference
//!   transformer implementation (lookup or character convolution embeddings) and a
//!   checkpoint loader
//! - `registry`: explicit registration of models and architectures by name
//! - `Dictionary`: symbol table providing the special token ids
//!
//! # Loading pretrained language models
//!
//! Checkpoints are directories containing a `config.json` file and a `model.ot` weights file.
//! Weights saved as numpy `.npz` archives can be converted with the `convert-tensor` binary:
//! ```bash
//! cargo run --bin=convert-tensor --release -- source.npz model.ot
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_squad::language_model::CheckpointLoader;
//! use rust_squad::registry::ModelRegistry;
//! use rust_squad::squad::FinetuningSquadConfig;
//! use rust_squad::{Config, Dictionary};
//! use tch::{nn, no_grad, Device};
//!
//! # fn main() -> Result<(), rust_squad::RustSquadError> {
//! let registry = ModelRegistry::with_defaults()?;
//! let config = FinetuningSquadConfig::from_file("path/to/squad_config.json")?;
//! let dictionary = Dictionary::load("path/to/dict.txt")?;
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let model = registry.build(
//!     "finetuning_squad",
//!     &vs,
//!     &config,
//!     &dictionary,
//!     &CheckpointLoader,
//! )?;
//!
//! let input = dictionary
//!     .encode_line("who designed it ? </s> it was designed by gustave eiffel . </s>", true)
//!     .unsqueeze(0);
//! let output = no_grad(|| model.forward_t(&input, false))?;
//! # Ok(())
//! # }
//! ```

mod common;
mod dictionary;
pub mod language_model;
pub mod registry;
pub mod squad;

pub use common::error::RustSquadError;
pub use common::{Activation, Config};
pub use dictionary::Dictionary;
