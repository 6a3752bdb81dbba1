use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DistillError;

/// Model variant tag embedded in a checkpoint's `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Wav2Vec2,
    Wav2Vec2Ctc,
    Hubert,
}

impl ModelType {
    pub fn from_tag(tag: &str) -> Result<Self, DistillError> {
        match tag {
            "wav2vec2" => Ok(Self::Wav2Vec2),
            "wav2vec_ctc" => Ok(Self::Wav2Vec2Ctc),
            "hubert" => Ok(Self::Hubert),
            other => Err(DistillError::UnsupportedModel {
                model_type: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wav2Vec2 => "wav2vec2",
            Self::Wav2Vec2Ctc => "wav2vec_ctc",
            Self::Hubert => "hubert",
        }
    }

    /// True for representation-only models without a task-specific head.
    pub fn is_task_agnostic(self) -> bool {
        !matches!(self, Self::Wav2Vec2Ctc)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_type: String,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    pub pad_token_id: usize,
    pub vocab_size: usize,
    #[serde(default = "default_feat_norm")]
    pub feat_extract_norm: String,
    #[serde(default = "default_conv_bias")]
    pub conv_bias: bool,
}

fn default_eps() -> f64 {
    1e-5
}
fn default_feat_norm() -> String {
    "layer".to_string()
}
fn default_conv_bias() -> bool {
    true
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, DistillError> {
        Self::resolve(path, None)
    }

    /// Read `config.json`, merge optional top-level key overrides, then
    /// deserialize. Overrides replace whole keys, matching the checkpoint
    /// loader's override semantics.
    pub fn resolve(
        path: &Path,
        overrides: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Self, DistillError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| DistillError::io("read config.json", e))?;
        let mut value: serde_json::Value =
            serde_json::from_str(&data).map_err(|e| DistillError::json("parse config.json", e))?;

        if let Some(overrides) = overrides {
            let root = value.as_object_mut().ok_or_else(|| {
                DistillError::invalid_input("config.json root must be a JSON object")
            })?;
            for (key, override_value) in overrides {
                root.insert(key.clone(), override_value.clone());
            }
        }

        serde_json::from_value(value).map_err(|e| DistillError::json("interpret config.json", e))
    }

    pub fn model_type(&self) -> Result<ModelType, DistillError> {
        ModelType::from_tag(&self.model_type)
    }

    pub fn frame_stride_ms(&self, sample_rate: u32) -> f64 {
        let stride_samples: usize = self.conv_stride.iter().product();
        stride_samples as f64 / sample_rate as f64 * 1000.0
    }

    /// Number of frames the conv stack produces for `samples` input samples.
    pub fn conv_output_length(&self, samples: usize) -> usize {
        let mut len = samples;
        for (&kernel, &stride) in self.conv_kernel.iter().zip(self.conv_stride.iter()) {
            if len < kernel {
                return 0;
            }
            len = (len - kernel) / stride + 1;
        }
        len
    }

    pub fn to_json_pretty(&self) -> Result<String, DistillError> {
        serde_json::to_string_pretty(self).map_err(|e| DistillError::json("serialize config", e))
    }

    pub fn to_yaml(&self) -> Result<String, DistillError> {
        serde_yaml::to_string(self).map_err(|e| DistillError::yaml("serialize config", e))
    }

    /// Write the resolved config to `path`, dispatching on the extension.
    pub fn dump(&self, path: &Path) -> Result<(), DistillError> {
        let rendered = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => self.to_yaml()?,
            Some("json") => self.to_json_pretty()?,
            _ => {
                return Err(DistillError::invalid_input(format!(
                    "unsupported config dump format for '{}' (use .yaml, .yml, or .json)",
                    path.display()
                )))
            }
        };
        std::fs::write(path, rendered).map_err(|e| DistillError::io("write config dump", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_CONFIG_JSON: &str = r#"{
        "model_type": "wav2vec2",
        "hidden_size": 768,
        "num_hidden_layers": 12,
        "num_attention_heads": 12,
        "intermediate_size": 3072,
        "conv_dim": [512],
        "conv_kernel": [10],
        "conv_stride": [5],
        "num_conv_pos_embeddings": 128,
        "num_conv_pos_embedding_groups": 16,
        "pad_token_id": 1,
        "vocab_size": 32
    }"#;

    #[test]
    fn model_type_tags_resolve() {
        assert_eq!(ModelType::from_tag("wav2vec2").unwrap(), ModelType::Wav2Vec2);
        assert_eq!(
            ModelType::from_tag("wav2vec_ctc").unwrap(),
            ModelType::Wav2Vec2Ctc
        );
        assert_eq!(ModelType::from_tag("hubert").unwrap(), ModelType::Hubert);
        assert!(matches!(
            ModelType::from_tag("conformer"),
            Err(DistillError::UnsupportedModel { model_type }) if model_type == "conformer"
        ));
    }

    #[test]
    fn task_agnostic_flag_per_variant() {
        assert!(ModelType::Wav2Vec2.is_task_agnostic());
        assert!(ModelType::Hubert.is_task_agnostic());
        assert!(!ModelType::Wav2Vec2Ctc.is_task_agnostic());
    }

    #[test]
    fn overrides_replace_top_level_keys() {
        let temp = std::env::temp_dir().join("speech_distill_config_overrides.json");
        std::fs::write(&temp, MINIMAL_CONFIG_JSON).expect("write config");

        let mut overrides = HashMap::new();
        overrides.insert("num_hidden_layers".to_string(), serde_json::json!(2));
        overrides.insert("model_type".to_string(), serde_json::json!("hubert"));

        let config = ModelConfig::resolve(&temp, Some(&overrides)).expect("resolve");
        assert_eq!(config.num_hidden_layers, 2);
        assert_eq!(config.model_type().unwrap(), ModelType::Hubert);
        // Untouched keys keep their file values.
        assert_eq!(config.hidden_size, 768);

        let _ = std::fs::remove_file(&temp);
    }

    #[test]
    fn conv_output_length_follows_kernel_stride_geometry() {
        let config: ModelConfig = serde_json::from_str(MINIMAL_CONFIG_JSON).expect("valid json");
        // (400 - 10) / 5 + 1 = 79
        assert_eq!(config.conv_output_length(400), 79);
        assert_eq!(config.conv_output_length(10), 1);
        assert_eq!(config.conv_output_length(9), 0);
        assert_eq!(config.conv_output_length(0), 0);
    }

    #[test]
    fn frame_stride_from_conv_strides() {
        let config: ModelConfig = serde_json::from_str(MINIMAL_CONFIG_JSON).expect("valid json");
        let stride_ms = config.frame_stride_ms(16_000);
        assert!((stride_ms - 0.3125).abs() < 1e-9);
    }

    #[test]
    fn dump_round_trips_through_json_and_yaml() {
        let config: ModelConfig = serde_json::from_str(MINIMAL_CONFIG_JSON).expect("valid json");

        let json = config.to_json_pretty().expect("json dump");
        let back: ModelConfig = serde_json::from_str(&json).expect("json reparse");
        assert_eq!(back.hidden_size, config.hidden_size);

        let yaml = config.to_yaml().expect("yaml dump");
        let back: ModelConfig = serde_yaml::from_str(&yaml).expect("yaml reparse");
        assert_eq!(back.conv_kernel, config.conv_kernel);
    }

    #[test]
    fn dump_rejects_unknown_extension() {
        let config: ModelConfig = serde_json::from_str(MINIMAL_CONFIG_JSON).expect("valid json");
        let err = config
            .dump(Path::new("/tmp/speech_distill_config.toml"))
            .expect_err("toml must be rejected");
        assert!(matches!(err, DistillError::InvalidInput { .. }));
    }
}
