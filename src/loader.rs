use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, VarBuilder};

use crate::config::{ModelConfig, ModelType};
use crate::error::DistillError;
use crate::model::{HubertModel, PretrainedModel, Wav2Vec2ForCtc, Wav2Vec2Model};

pub const CONFIG_FILENAME: &str = "config.json";
pub const WEIGHTS_FILENAME: &str = "model.safetensors";

/// A model reconstructed from a checkpoint directory, together with its
/// resolved configuration.
pub struct LoadedModel {
    pub model: PretrainedModel,
    pub config: ModelConfig,
    /// True for representation-only models without a task head.
    pub task_agnostic: bool,
}

/// Load a checkpoint directory (`config.json` + `model.safetensors`),
/// optionally merging top-level config overrides first.
///
/// Loading is strict in both directions: a weight the model needs but the
/// checkpoint lacks fails, and a checkpoint tensor the model never consumes
/// fails with a state-mismatch error naming the leftovers.
pub fn load_model_and_config(
    checkpoint_dir: &Path,
    overrides: Option<&HashMap<String, serde_json::Value>>,
    device: &Device,
) -> Result<LoadedModel, DistillError> {
    let config = ModelConfig::resolve(&checkpoint_dir.join(CONFIG_FILENAME), overrides)?;
    let model_type = config.model_type()?;

    let tensors = candle_core::safetensors::load(checkpoint_dir.join(WEIGHTS_FILENAME), device)
        .map_err(|e| DistillError::model("read model.safetensors", e))?;

    let (model, store) = build_model(model_type, &config, tensors, device)?;
    store.verify_fully_consumed()?;

    tracing::info!(
        model_type = model_type.as_str(),
        hidden_size = config.hidden_size,
        layers = config.num_hidden_layers,
        vocab = config.vocab_size,
        task_agnostic = model_type.is_task_agnostic(),
        "checkpoint loaded"
    );

    Ok(LoadedModel {
        model,
        config,
        task_agnostic: model_type.is_task_agnostic(),
    })
}

/// Build `model_type` against a tracking tensor store so consumption can be
/// verified afterwards.
fn build_model(
    model_type: ModelType,
    config: &ModelConfig,
    tensors: HashMap<String, Tensor>,
    device: &Device,
) -> Result<(PretrainedModel, CheckpointStore), DistillError> {
    let store = CheckpointStore::new(&tensors);
    let backend = TrackedTensors {
        tensors,
        used: store.used.clone(),
    };
    let vb = VarBuilder::from_backend(Box::new(backend), DType::F32, device.clone());

    let model = match model_type {
        ModelType::Wav2Vec2 => Wav2Vec2Model::load(config, vb)
            .map(PretrainedModel::Wav2Vec2)
            .map_err(|e| DistillError::state_mismatch("build wav2vec2", e.to_string()))?,
        ModelType::Wav2Vec2Ctc => Wav2Vec2ForCtc::load(config, vb)
            .map(PretrainedModel::Wav2Vec2Ctc)
            .map_err(|e| DistillError::state_mismatch("build wav2vec_ctc", e.to_string()))?,
        ModelType::Hubert => HubertModel::load(config, vb)
            .map(PretrainedModel::Hubert)
            .map_err(|e| DistillError::state_mismatch("build hubert", e.to_string()))?,
    };
    Ok((model, store))
}

/// Names present in a checkpoint plus the set the model actually consumed.
struct CheckpointStore {
    names: HashSet<String>,
    used: Arc<Mutex<HashSet<String>>>,
}

impl CheckpointStore {
    fn new(tensors: &HashMap<String, Tensor>) -> Self {
        Self {
            names: tensors.keys().cloned().collect(),
            used: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn verify_fully_consumed(&self) -> Result<(), DistillError> {
        let used = self
            .used
            .lock()
            .map_err(|_| DistillError::state_mismatch("verify checkpoint coverage", "tensor usage tracker poisoned"))?;
        let mut leftover: Vec<&str> = self
            .names
            .iter()
            .filter(|name| !used.contains(*name))
            .map(String::as_str)
            .collect();
        if leftover.is_empty() {
            return Ok(());
        }
        leftover.sort_unstable();
        let preview = leftover
            .iter()
            .take(8)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        let suffix = if leftover.len() > 8 { ", ..." } else { "" };
        Err(DistillError::state_mismatch(
            "verify checkpoint coverage",
            format!(
                "{} checkpoint tensor(s) unused by the model: {preview}{suffix}",
                leftover.len()
            ),
        ))
    }
}

/// `VarBuilder` backend over a loaded tensor map that records every tensor
/// the model construction consumes.
struct TrackedTensors {
    tensors: HashMap<String, Tensor>,
    used: Arc<Mutex<HashSet<String>>>,
}

impl SimpleBackend for TrackedTensors {
    fn get(
        &self,
        s: Shape,
        name: &str,
        _hints: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        let tensor = self.tensors.get(name).ok_or_else(|| {
            candle_core::Error::Msg(format!("checkpoint has no tensor named '{name}'"))
        })?;
        if tensor.shape() != &s {
            return Err(candle_core::Error::Msg(format!(
                "shape mismatch for '{name}': checkpoint has {:?}, model expects {:?}",
                tensor.shape(),
                s
            )));
        }
        self.used
            .lock()
            .map_err(|_| candle_core::Error::Msg("tensor usage tracker poisoned".to_string()))?
            .insert(name.to_string());

        let tensor = tensor.to_device(dev)?;
        if tensor.dtype() == dtype {
            Ok(tensor)
        } else {
            tensor.to_dtype(dtype)
        }
    }

    fn get_unchecked(&self, name: &str, dtype: DType, dev: &Device) -> candle_core::Result<Tensor> {
        let tensor = self.tensors.get(name).ok_or_else(|| {
            candle_core::Error::Msg(format!("checkpoint has no tensor named '{name}'"))
        })?;
        self.used
            .lock()
            .map_err(|_| candle_core::Error::Msg("tensor usage tracker poisoned".to_string()))?
            .insert(name.to_string());

        let tensor = tensor.to_device(dev)?;
        if tensor.dtype() == dtype {
            Ok(tensor)
        } else {
            tensor.to_dtype(dtype)
        }
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::tiny_config;
    use candle_nn::VarMap;

    /// Materialize the full tensor set of a tiny model by building it once
    /// against a fresh `VarMap`.
    fn tiny_tensor_map(model_type: ModelType) -> (ModelConfig, HashMap<String, Tensor>) {
        let config = tiny_config(model_type.as_str());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        match model_type {
            ModelType::Wav2Vec2 => {
                Wav2Vec2Model::load(&config, vb).expect("build against varmap");
            }
            ModelType::Wav2Vec2Ctc => {
                Wav2Vec2ForCtc::load(&config, vb).expect("build against varmap");
            }
            ModelType::Hubert => {
                HubertModel::load(&config, vb).expect("build against varmap");
            }
        }
        let tensors = varmap
            .data()
            .lock()
            .expect("varmap lock")
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        (config, tensors)
    }

    fn write_checkpoint(
        dir_name: &str,
        config: &ModelConfig,
        tensors: &HashMap<String, Tensor>,
    ) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).expect("create checkpoint dir");
        std::fs::write(
            dir.join(CONFIG_FILENAME),
            config.to_json_pretty().expect("config json"),
        )
        .expect("write config");
        candle_core::safetensors::save(tensors, dir.join(WEIGHTS_FILENAME))
            .expect("write safetensors");
        dir
    }

    #[test]
    fn exact_tensor_set_loads_strictly() {
        let (config, tensors) = tiny_tensor_map(ModelType::Wav2Vec2);
        let (model, store) =
            build_model(ModelType::Wav2Vec2, &config, tensors, &Device::Cpu).expect("build");
        store.verify_fully_consumed().expect("all tensors consumed");
        assert_eq!(model.model_type(), ModelType::Wav2Vec2);
        assert_eq!(model.num_layers(), 2);
    }

    #[test]
    fn leftover_checkpoint_tensor_is_a_state_mismatch() {
        let (config, mut tensors) = tiny_tensor_map(ModelType::Wav2Vec2);
        tensors.insert(
            "quantizer.codebook".to_string(),
            Tensor::zeros((2, 2), DType::F32, &Device::Cpu).expect("extra tensor"),
        );
        let (_model, store) =
            build_model(ModelType::Wav2Vec2, &config, tensors, &Device::Cpu).expect("build");
        let err = store
            .verify_fully_consumed()
            .expect_err("extra tensor must fail verification");
        match err {
            DistillError::StateMismatch { message, .. } => {
                assert!(message.contains("quantizer.codebook"), "got: {message}");
            }
            other => panic!("expected state mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_checkpoint_tensor_is_a_state_mismatch() {
        let (config, mut tensors) = tiny_tensor_map(ModelType::Wav2Vec2);
        let victim = tensors
            .keys()
            .find(|name| name.contains("encoder.layers.1"))
            .expect("layer tensor present")
            .clone();
        tensors.remove(&victim);
        let err = build_model(ModelType::Wav2Vec2, &config, tensors, &Device::Cpu)
            .map(|_| ())
            .expect_err("missing tensor must fail");
        assert!(matches!(err, DistillError::StateMismatch { .. }));
    }

    #[test]
    fn shape_disagreement_is_a_state_mismatch() {
        let (config, mut tensors) = tiny_tensor_map(ModelType::Wav2Vec2);
        let victim = tensors
            .keys()
            .find(|name| name.ends_with("feature_projection.projection.weight"))
            .expect("projection weight present")
            .clone();
        tensors.insert(
            victim,
            Tensor::zeros((3, 3), DType::F32, &Device::Cpu).expect("wrong-shape tensor"),
        );
        let err = build_model(ModelType::Wav2Vec2, &config, tensors, &Device::Cpu)
            .map(|_| ())
            .expect_err("shape mismatch must fail");
        match err {
            DistillError::StateMismatch { message, .. } => {
                assert!(message.contains("shape mismatch"), "got: {message}");
            }
            other => panic!("expected state mismatch, got {other:?}"),
        }
    }

    #[test]
    fn ctc_variant_consumes_prefixed_trunk_and_head() {
        let (config, tensors) = tiny_tensor_map(ModelType::Wav2Vec2Ctc);
        assert!(tensors.keys().any(|name| name.starts_with("wav2vec2.")));
        assert!(tensors.keys().any(|name| name.starts_with("lm_head.")));
        let (model, store) =
            build_model(ModelType::Wav2Vec2Ctc, &config, tensors, &Device::Cpu).expect("build");
        store.verify_fully_consumed().expect("all tensors consumed");
        assert!(!model.is_task_agnostic());
    }

    #[test]
    fn full_checkpoint_roundtrip_from_disk() {
        let (config, tensors) = tiny_tensor_map(ModelType::Hubert);
        let dir = write_checkpoint("speech_distill_loader_roundtrip", &config, &tensors);

        let loaded =
            load_model_and_config(&dir, None, &Device::Cpu).expect("load from checkpoint dir");
        assert!(loaded.task_agnostic);
        assert_eq!(loaded.model.model_type(), ModelType::Hubert);
        assert_eq!(loaded.config.num_hidden_layers, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_model_type_tag_fails() {
        let (config, tensors) = tiny_tensor_map(ModelType::Wav2Vec2);
        let dir = write_checkpoint("speech_distill_loader_unsupported", &config, &tensors);

        let mut overrides = HashMap::new();
        overrides.insert("model_type".to_string(), serde_json::json!("conformer"));
        let err = load_model_and_config(&dir, Some(&overrides), &Device::Cpu)
            .map(|_| ())
            .expect_err("unknown tag must fail");
        assert!(matches!(
            err,
            DistillError::UnsupportedModel { model_type } if model_type == "conformer"
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
