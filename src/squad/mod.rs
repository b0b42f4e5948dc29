//! # SQuAD fine-tuning head
//!
//! Extractive question answering on top of a pretrained `LanguageModel`. For every token the
//! head predicts 2 logits for the answer start and 2 logits for the answer end; for every
//! sequence it predicts 2 logits for the question being answerable or impossible, computed from
//! the hidden states at the three end-of-sentence markers of the sequence.
//!
//! The projections are initialized to 0: before any training step all logits are 0.
//! Softmax, span decoding and losses are left to the caller.
//!
//! ```no_run
//! use rust_squad::language_model::CheckpointLoader;
//! use rust_squad::squad::{FinetuningSquad, FinetuningSquadConfig};
//! use rust_squad::{Config, Dictionary};
//! use tch::{nn, no_grad, Device, Tensor};
//!
//! # fn main() -> Result<(), rust_squad::RustSquadError> {
//! let config = FinetuningSquadConfig::from_file("path/to/squad_config.json")?;
//! let dictionary = Dictionary::load("path/to/dict.txt")?;
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let model = FinetuningSquad::build_model(&vs, &config, &dictionary, &CheckpointLoader)?;
//!
//! let question = dictionary.encode_line("when was it built ?", true);
//! let passage = dictionary.encode_line("it was built in 1889 .", true);
//! let input = Tensor::cat(&[question, passage, Tensor::of_slice(&[dictionary.eos()])], 0)
//!     .unsqueeze(0)
//!     .to(vs.device());
//!
//! let output = no_grad(|| model.forward_t(&input, false))?;
//! let answer_start = output.start_logits.select(-1, 1).argmax(-1, false);
//! # Ok(())
//! # }
//! ```

mod squad_model;

pub use squad_model::{
    base_architecture, FinetuningSquad, FinetuningSquadConfig, SquadModelOutput,
    DEFAULT_ATTENTION_DROPOUT, DEFAULT_LAST_DROPOUT, DEFAULT_MODEL_DIM, DEFAULT_MODEL_DROPOUT,
    DEFAULT_RELU_DROPOUT, LANGUAGE_MODEL_PREFIX,
};
