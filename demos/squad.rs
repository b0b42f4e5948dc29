extern crate anyhow;

use rust_squad::language_model::CheckpointLoader;
use rust_squad::registry::ModelRegistry;
use rust_squad::squad::FinetuningSquadConfig;
use rust_squad::Dictionary;
use std::env;
use std::path::PathBuf;
use tch::{nn, no_grad, Device, Kind, Tensor};

fn main() -> anyhow::Result<()> {
    //    Resources paths
    let checkpoint: PathBuf = env::var("squad_lm_checkpoint")
        .expect("Please set the \"squad_lm_checkpoint\" environment variable pointing to a language model checkpoint directory")
        .into();
    let dictionary = Dictionary::load(checkpoint.join("dict.txt"))?;

    //    Set-up SQuAD model
    let registry = ModelRegistry::with_defaults()?;
    let vs = nn::VarStore::new(Device::cuda_if_available());
    let config = FinetuningSquadConfig {
        lm_path: Some(checkpoint.to_string_lossy().into_owned()),
        model_dim: Some(env::var("squad_model_dim").map_or(Ok(1024), |dim| dim.parse())?),
        ..Default::default()
    };
    let model = registry.build(
        "finetuning_squad",
        &vs,
        &config,
        &dictionary,
        &CheckpointLoader,
    )?;

    //    Define input
    let question = dictionary.encode_line("Where does Amy live ?", true);
    let context = dictionary.encode_line("Amy lives in Amsterdam", true);
    let input = Tensor::cat(&[question, context, Tensor::of_slice(&[dictionary.eos()])], 0)
        .unsqueeze(0)
        .to(vs.device());

    //    Forward pass
    let output = no_grad(|| model.forward_t(&input, false))?;
    let impossible = output.imp_logits.softmax(-1, Kind::Float).double_value(&[0, 1]);
    let start = output.start_logits.select(-1, 1).argmax(-1, false).int64_value(&[0]);
    let end = output.end_logits.select(-1, 1).argmax(-1, false).int64_value(&[0]);

    println!("answer span: [{}, {}], unanswerable: {:.3}", start, end, impossible);
    Ok(())
}
