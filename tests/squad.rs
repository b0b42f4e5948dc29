use rust_squad::language_model::{
    CharacterEmbeddingsConfig, CheckpointLoader, LanguageModel, LanguageModelLoader,
    LanguageModelOutput, LanguageModelOverrides, TransformerLanguageModel,
    TransformerLanguageModelConfig,
};
use rust_squad::registry::ModelRegistry;
use rust_squad::squad::{
    base_architecture, FinetuningSquad, FinetuningSquadConfig, DEFAULT_MODEL_DIM,
};
use rust_squad::{Config, Dictionary, RustSquadError};
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::PathBuf;
use tch::{nn, no_grad, Device, Kind, Tensor};

/// Language model returning fixed hidden states, whatever the input.
struct FixedLanguageModel {
    hidden_state: Tensor,
}

impl LanguageModel for FixedLanguageModel {
    fn forward_t(
        &self,
        _input_ids: &Tensor,
        _train: bool,
    ) -> Result<LanguageModelOutput, RustSquadError> {
        Ok(LanguageModelOutput {
            hidden_state: self.hidden_state.shallow_clone(),
            all_hidden_states: Some(vec![self.hidden_state.zeros_like()]),
        })
    }

    fn embed_dim(&self) -> i64 {
        self.hidden_state.size()[2]
    }
}

/// Loader returning `num_models` fixed language models and recording its calls.
struct RecordingLoader {
    num_models: usize,
    hidden_state: Tensor,
    calls: Cell<usize>,
    overrides: RefCell<Option<LanguageModelOverrides>>,
}

impl RecordingLoader {
    fn new(num_models: usize, hidden_state: Tensor) -> RecordingLoader {
        RecordingLoader {
            num_models,
            hidden_state,
            calls: Cell::new(0),
            overrides: RefCell::new(None),
        }
    }
}

impl LanguageModelLoader for RecordingLoader {
    fn load(
        &self,
        _vs: &nn::VarStore,
        _prefix: &str,
        _paths: &[PathBuf],
        _dictionary: &Dictionary,
        overrides: &LanguageModelOverrides,
    ) -> Result<Vec<Box<dyn LanguageModel>>, RustSquadError> {
        self.calls.set(self.calls.get() + 1);
        *self.overrides.borrow_mut() = Some(*overrides);
        Ok((0..self.num_models)
            .map(|_| {
                Box::new(FixedLanguageModel {
                    hidden_state: self.hidden_state.shallow_clone(),
                }) as Box<dyn LanguageModel>
            })
            .collect())
    }
}

fn config_with_dim(model_dim: i64) -> FinetuningSquadConfig {
    FinetuningSquadConfig {
        lm_path: Some("unused/path".to_string()),
        model_dim: Some(model_dim),
        ..Default::default()
    }
}

fn tiny_lm_config() -> TransformerLanguageModelConfig {
    TransformerLanguageModelConfig {
        vocab_size: 16,
        embed_dim: 8,
        ffn_embed_dim: 16,
        layers: 2,
        attention_heads: 2,
        max_positions: 32,
        ..Default::default()
    }
}

fn max_abs(tensor: &Tensor) -> f64 {
    tensor.abs().max().double_value(&[])
}

#[test]
fn missing_lm_path_fails_before_loading() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let loader = RecordingLoader::new(1, Tensor::zeros(&[1, 5, 4], (Kind::Float, Device::Cpu)));
    let config = FinetuningSquadConfig {
        model_dim: Some(4),
        ..Default::default()
    };

    let result = FinetuningSquad::build_model(&vs, &config, &Dictionary::new(), &loader);

    assert!(matches!(
        result,
        Err(RustSquadError::InvalidConfigurationError(_))
    ));
    assert_eq!(loader.calls.get(), 0);
    assert!(vs.variables().is_empty());
    Ok(())
}

#[test]
fn ensembles_are_rejected() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let loader = RecordingLoader::new(2, Tensor::zeros(&[1, 5, 4], (Kind::Float, Device::Cpu)));

    let result =
        FinetuningSquad::build_model(&vs, &config_with_dim(4), &Dictionary::new(), &loader);

    assert!(matches!(
        result,
        Err(RustSquadError::EnsembleNotSupported(2))
    ));
    assert_eq!(loader.calls.get(), 1);
    Ok(())
}

#[test]
fn loader_receives_language_model_overrides() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let loader = RecordingLoader::new(1, Tensor::zeros(&[1, 5, 4], (Kind::Float, Device::Cpu)));
    let config = FinetuningSquadConfig {
        attention_dropout: Some(0.3),
        ..config_with_dim(4)
    };

    let _ = FinetuningSquad::build_model(&vs, &config, &Dictionary::new(), &loader)?;

    let overrides = loader.overrides.borrow().expect("loader was not called");
    assert_eq!(
        overrides,
        LanguageModelOverrides {
            remove_head: true,
            dropout: Some(0.1),
            attention_dropout: Some(0.3),
            relu_dropout: Some(0.05),
        }
    );
    Ok(())
}

#[test]
fn projections_start_at_zero() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let loader = RecordingLoader::new(1, Tensor::zeros(&[1, 5, 4], (Kind::Float, Device::Cpu)));
    let _ = FinetuningSquad::build_model(&vs, &config_with_dim(4), &Dictionary::new(), &loader)?;

    let variables = vs.variables();
    let expected_shapes = [
        ("start_proj.weight", vec![2, 4]),
        ("start_proj.bias", vec![2]),
        ("end_proj.weight", vec![2, 4]),
        ("end_proj.bias", vec![2]),
        ("imp_proj.weight", vec![2, 12]),
        ("imp_proj.bias", vec![2]),
    ];
    assert_eq!(variables.len(), expected_shapes.len());
    for (name, shape) in expected_shapes.iter() {
        let variable = &variables[*name];
        assert_eq!(&variable.size(), shape);
        assert_eq!(max_abs(variable), 0.0, "{} is not zero-initialized", name);
        assert!(variable.requires_grad());
    }
    Ok(())
}

#[test]
fn untrained_head_outputs_zero_logits() -> anyhow::Result<()> {
    //    Batch of 1 sequence of length 5, hidden dimension 4, end of sentence at {0, 2, 4}
    let dictionary = Dictionary::new();
    let eos = dictionary.eos();
    let vs = nn::VarStore::new(Device::Cpu);
    let hidden_state = Tensor::randn(&[1, 5, 4], (Kind::Float, Device::Cpu));
    let model = FinetuningSquad::new(
        vs.root(),
        &config_with_dim(4),
        Box::new(FixedLanguageModel { hidden_state }),
        eos,
        dictionary.pad(),
        dictionary.unk(),
    )?;
    let input = Tensor::of_slice(&[eos, 7, eos, 8, eos]).view([1, 5]);

    let output = no_grad(|| model.forward_t(&input, false))?;

    assert_eq!(output.imp_logits.size(), vec![1, 2]);
    assert_eq!(output.start_logits.size(), vec![1, 5, 2]);
    assert_eq!(output.end_logits.size(), vec![1, 5, 2]);
    assert_eq!(max_abs(&output.imp_logits), 0.0);
    assert_eq!(max_abs(&output.start_logits), 0.0);
    assert_eq!(max_abs(&output.end_logits), 0.0);
    Ok(())
}

#[test]
fn forward_matches_projection_of_hidden_states() -> anyhow::Result<()> {
    let dictionary = Dictionary::new();
    let eos = dictionary.eos();
    let vs = nn::VarStore::new(Device::Cpu);
    let hidden_state = Tensor::arange(2 * 6 * 3, (Kind::Float, Device::Cpu)).view([2, 6, 3]);
    let model = FinetuningSquad::new(
        vs.root(),
        &config_with_dim(3),
        Box::new(FixedLanguageModel {
            hidden_state: hidden_state.shallow_clone(),
        }),
        eos,
        dictionary.pad(),
        dictionary.unk(),
    )?;

    //    start logits: [sum of hidden state, 0]; impossibility logits: [0, sum of the eos embeddings]
    let mut variables = vs.variables();
    no_grad(|| {
        let _ = variables
            .get_mut("start_proj.weight")
            .unwrap()
            .get(0)
            .fill_(1.0);
        let _ = variables
            .get_mut("imp_proj.weight")
            .unwrap()
            .get(1)
            .fill_(1.0);
        let _ = variables.get_mut("end_proj.bias").unwrap().fill_(2.0);
    });

    let input = Tensor::of_slice(&[5i64, eos, 6, eos, eos, 1, eos, 4, 4, eos, 9, eos])
        .view([2, 6]);
    let output = no_grad(|| model.forward_t(&input, false))?;

    let expected_start = hidden_state.sum_dim_intlist(&[-1], false, Kind::Float);
    assert_eq!(
        max_abs(&(output.start_logits.select(-1, 0) - &expected_start)),
        0.0
    );
    assert_eq!(max_abs(&output.start_logits.select(-1, 1)), 0.0);
    assert_eq!(max_abs(&(output.end_logits - 2.0)), 0.0);

    let eos_positions = [[1i64, 3, 4], [0, 3, 5]];
    for (batch_index, positions) in eos_positions.iter().enumerate() {
        let expected: f64 = positions
            .iter()
            .map(|&position| {
                hidden_state
                    .get(batch_index as i64)
                    .get(position)
                    .sum(Kind::Float)
                    .double_value(&[])
            })
            .sum();
        let imp = output.imp_logits.get(batch_index as i64);
        assert_eq!(imp.double_value(&[0]), 0.0);
        assert!((imp.double_value(&[1]) - expected).abs() < 1e-4);
    }
    Ok(())
}

#[test]
fn wrong_number_of_markers_is_a_tensor_error() -> anyhow::Result<()> {
    let dictionary = Dictionary::new();
    let eos = dictionary.eos();
    let vs = nn::VarStore::new(Device::Cpu);
    let model = FinetuningSquad::new(
        vs.root(),
        &config_with_dim(4),
        Box::new(FixedLanguageModel {
            hidden_state: Tensor::ones(&[1, 5, 4], (Kind::Float, Device::Cpu)),
        }),
        eos,
        dictionary.pad(),
        dictionary.unk(),
    )?;
    let input = Tensor::of_slice(&[eos, 7, 8, 9, eos]).view([1, 5]);

    let result = no_grad(|| model.forward_t(&input, false));

    assert!(matches!(result, Err(RustSquadError::TchError(_))));
    Ok(())
}

#[test]
fn model_dim_must_match_language_model() {
    let dictionary = Dictionary::new();
    let vs = nn::VarStore::new(Device::Cpu);
    let result = FinetuningSquad::new(
        vs.root(),
        &config_with_dim(8),
        Box::new(FixedLanguageModel {
            hidden_state: Tensor::ones(&[1, 5, 4], (Kind::Float, Device::Cpu)),
        }),
        dictionary.eos(),
        dictionary.pad(),
        dictionary.unk(),
    );
    assert!(matches!(
        result,
        Err(RustSquadError::InvalidConfigurationError(_))
    ));
}

#[test]
fn base_architecture_fills_defaults_once() {
    let mut config = FinetuningSquadConfig {
        last_dropout: Some(0.3),
        ..Default::default()
    };

    base_architecture(&mut config);
    let first_pass = config.clone();
    base_architecture(&mut config);

    assert_eq!(config, first_pass);
    assert_eq!(config.model_dim, Some(DEFAULT_MODEL_DIM));
    assert_eq!(config.last_dropout, Some(0.3));
    assert_eq!(config.model_dropout, Some(0.1));
    assert_eq!(config.attention_dropout, Some(0.1));
    assert_eq!(config.relu_dropout, Some(0.05));
    assert_eq!(config.lm_path, None);
}

#[test]
fn config_from_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{"lm_path": "checkpoints/lm", "model_dim": 512, "last_dropout": 0.2}}"#
    )?;
    let config = FinetuningSquadConfig::from_file(file.path())?;
    assert_eq!(config.lm_path.as_deref(), Some("checkpoints/lm"));
    assert_eq!(config.model_dim, Some(512));
    assert_eq!(config.last_dropout, Some(0.2));
    assert_eq!(config.relu_dropout, None);
    Ok(())
}

#[test]
fn character_convolutions_are_frozen() -> anyhow::Result<()> {
    let mut dictionary = Dictionary::new();
    for word in &["who", "built", "it", "?", "eiffel"] {
        dictionary.add_symbol(word);
    }
    let lm_config = TransformerLanguageModelConfig {
        character_embeddings: Some(CharacterEmbeddingsConfig {
            char_embed_dim: 4,
            filters: vec![(1, 4), (2, 4), (3, 8)],
            highway_layers: 1,
            max_char_len: 10,
        }),
        ..tiny_lm_config()
    };
    let vs = nn::VarStore::new(Device::Cpu);
    let language_model = TransformerLanguageModel::new(
        &vs.root() / "language_model",
        &lm_config,
        &dictionary,
        true,
    )?;

    let _ = FinetuningSquad::new(
        vs.root(),
        &config_with_dim(8),
        Box::new(language_model),
        dictionary.eos(),
        dictionary.pad(),
        dictionary.unk(),
    )?;

    let mut frozen = 0;
    for (name, variable) in vs.variables() {
        if name.starts_with("language_model.embed_tokens.convolutions.") {
            assert!(!variable.requires_grad(), "{} should be frozen", name);
            frozen += 1;
        } else {
            assert!(variable.requires_grad(), "{} should be trainable", name);
        }
    }
    assert_eq!(frozen, 6);
    Ok(())
}

#[test]
fn build_from_checkpoint() -> anyhow::Result<()> {
    let mut dictionary = Dictionary::new();
    for word in &["when", "was", "it", "built", "?", "in", "1889", "."] {
        dictionary.add_symbol(word);
    }
    let checkpoint = tempfile::tempdir()?;
    let lm_config = tiny_lm_config();
    {
        let pretrained_vs = nn::VarStore::new(Device::Cpu);
        let _ = TransformerLanguageModel::new(
            &pretrained_vs.root() / "lm",
            &lm_config,
            &dictionary,
            false,
        )?;
        CheckpointLoader::save(&pretrained_vs, "lm", &lm_config, checkpoint.path())?;
    }

    let config = FinetuningSquadConfig {
        lm_path: Some(checkpoint.path().to_string_lossy().into_owned()),
        model_dim: Some(lm_config.embed_dim),
        ..Default::default()
    };
    let registry = ModelRegistry::with_defaults()?;
    let vs = nn::VarStore::new(Device::Cpu);
    let model = registry.build(
        "finetuning_squad",
        &vs,
        &config,
        &dictionary,
        &CheckpointLoader,
    )?;

    assert!(vs
        .variables()
        .keys()
        .any(|name| name.starts_with("language_model.layers.1.")));
    assert_eq!(model.language_model().embed_dim(), 8);

    let question = dictionary.encode_line("when was it built ?", true);
    let passage = dictionary.encode_line("it was built in 1889 .", true);
    let sequence = Tensor::cat(&[question, passage, Tensor::of_slice(&[dictionary.eos()])], 0);
    let input = Tensor::stack(&[sequence.shallow_clone(), sequence], 0);

    let output = no_grad(|| model.forward_t(&input, false))?;
    assert_eq!(output.imp_logits.size(), vec![2, 2]);
    assert_eq!(output.start_logits.size(), vec![2, 14, 2]);
    assert_eq!(output.end_logits.size(), vec![2, 14, 2]);
    assert_eq!(max_abs(&output.start_logits), 0.0);
    Ok(())
}

#[test]
fn last_dropout_is_applied_before_every_projection() -> anyhow::Result<()> {
    let dictionary = Dictionary::new();
    let eos = dictionary.eos();
    let vs = nn::VarStore::new(Device::Cpu);
    let config = FinetuningSquadConfig {
        last_dropout: Some(1.0),
        ..config_with_dim(4)
    };
    let model = FinetuningSquad::new(
        vs.root(),
        &config,
        Box::new(FixedLanguageModel {
            hidden_state: Tensor::ones(&[1, 5, 4], (Kind::Float, Device::Cpu)),
        }),
        eos,
        dictionary.pad(),
        dictionary.unk(),
    )?;

    let mut variables = vs.variables();
    no_grad(|| {
        for name in &["start_proj.weight", "end_proj.weight", "imp_proj.weight"] {
            let _ = variables.get_mut(*name).unwrap().fill_(1.0);
        }
        let _ = variables.get_mut("start_proj.bias").unwrap().fill_(0.5);
        let _ = variables.get_mut("end_proj.bias").unwrap().fill_(-1.0);
        let _ = variables.get_mut("imp_proj.bias").unwrap().fill_(0.25);
    });
    let input = Tensor::of_slice(&[eos, 7, eos, 8, eos]).view([1, 5]);

    //    Every hidden state is dropped: only the biases remain
    let training = no_grad(|| model.forward_t(&input, true))?;
    assert_eq!(max_abs(&(&training.start_logits - 0.5)), 0.0);
    assert_eq!(max_abs(&(&training.end_logits + 1.0)), 0.0);
    assert_eq!(max_abs(&(&training.imp_logits - 0.25)), 0.0);

    let inference = no_grad(|| model.forward_t(&input, false))?;
    assert_eq!(max_abs(&(&inference.start_logits - 4.5)), 0.0);
    assert_eq!(max_abs(&(&inference.end_logits - 3.0)), 0.0);
    assert_eq!(max_abs(&(&inference.imp_logits - 12.25)), 0.0);
    assert!(max_abs(&(&inference.start_logits - &training.start_logits)) > 0.0);
    assert!(max_abs(&(&inference.imp_logits - &training.imp_logits)) > 0.0);
    Ok(())
}

#[test]
fn build_again_after_a_failed_load() -> anyhow::Result<()> {
    let dictionary = Dictionary::new();
    let checkpoint = tempfile::tempdir()?;
    let lm_config = tiny_lm_config();
    let save_checkpoint = |layers: i64| -> anyhow::Result<()> {
        let pretrained_vs = nn::VarStore::new(Device::Cpu);
        let weights_config = TransformerLanguageModelConfig {
            layers,
            ..tiny_lm_config()
        };
        let _ = TransformerLanguageModel::new(
            &pretrained_vs.root() / "lm",
            &weights_config,
            &dictionary,
            true,
        )?;
        CheckpointLoader::save(&pretrained_vs, "lm", &lm_config, checkpoint.path())?;
        Ok(())
    };
    let config = FinetuningSquadConfig {
        lm_path: Some(checkpoint.path().to_string_lossy().into_owned()),
        ..config_with_dim(lm_config.embed_dim)
    };
    let vs = nn::VarStore::new(Device::Cpu);

    //    Weights of the second layer are missing from the checkpoint
    save_checkpoint(1)?;
    let result = FinetuningSquad::build_model(&vs, &config, &dictionary, &CheckpointLoader);
    assert!(matches!(result, Err(RustSquadError::TchError(_))));

    save_checkpoint(2)?;
    let model = FinetuningSquad::build_model(&vs, &config, &dictionary, &CheckpointLoader)?;

    let input = Tensor::of_slice(&[4i64, 2, 5, 6, 2, 2]).view([1, 6]);
    let output = no_grad(|| model.forward_t(&input, false))?;
    assert_eq!(output.start_logits.size(), vec![1, 6, 2]);
    Ok(())
}
