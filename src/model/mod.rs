pub(crate) mod backbone;
mod ctc_model;
mod encoder;
mod feature_extractor;
mod feature_projection;
mod hubert;
pub mod layers;
mod wav2vec2;

pub use ctc_model::Wav2Vec2ForCtc;
pub use hubert::HubertModel;
pub use wav2vec2::Wav2Vec2Model;

use crate::config::ModelType;
use self::backbone::SpeechBackbone;

/// A model reconstructed from a checkpoint, one variant per supported
/// `model_type` tag.
pub enum PretrainedModel {
    Wav2Vec2(Wav2Vec2Model),
    Wav2Vec2Ctc(Wav2Vec2ForCtc),
    Hubert(HubertModel),
}

impl PretrainedModel {
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Wav2Vec2(_) => ModelType::Wav2Vec2,
            Self::Wav2Vec2Ctc(_) => ModelType::Wav2Vec2Ctc,
            Self::Hubert(_) => ModelType::Hubert,
        }
    }

    pub fn is_task_agnostic(&self) -> bool {
        self.model_type().is_task_agnostic()
    }

    pub fn num_layers(&self) -> usize {
        self.backbone().num_layers()
    }

    /// The shared trunk; for the CTC variant this is the encoder under the
    /// task head.
    pub(crate) fn backbone(&self) -> &SpeechBackbone {
        match self {
            Self::Wav2Vec2(m) => m.backbone(),
            Self::Wav2Vec2Ctc(m) => m.backbone(),
            Self::Hubert(m) => m.backbone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::ModelConfig;

    /// Smallest config that exercises every trunk component on CPU.
    pub(crate) fn tiny_config(model_type: &str) -> ModelConfig {
        let json = format!(
            r#"{{
                "model_type": "{model_type}",
                "hidden_size": 8,
                "num_hidden_layers": 2,
                "num_attention_heads": 2,
                "intermediate_size": 16,
                "conv_dim": [4],
                "conv_kernel": [3],
                "conv_stride": [2],
                "num_conv_pos_embeddings": 2,
                "num_conv_pos_embedding_groups": 2,
                "pad_token_id": 1,
                "vocab_size": 32
            }}"#
        );
        serde_json::from_str(&json).expect("tiny config json")
    }
}
