use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::ModelConfig;
use crate::model::backbone::SpeechBackbone;

/// Task-agnostic HuBERT representation model. The pretraining-only pieces
/// (masked-prediction head, codebook embeddings) are not part of inference
/// checkpoints; the trunk is shared with wav2vec2 and stored at the root
/// prefix.
pub struct HubertModel {
    backbone: SpeechBackbone,
}

impl HubertModel {
    pub(crate) fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            backbone: SpeechBackbone::load(cfg, vb)?,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.backbone.num_layers()
    }

    pub(crate) fn backbone(&self) -> &SpeechBackbone {
        &self.backbone
    }

    pub fn extract_features<F>(
        &self,
        source: &Tensor,
        padding_mask: Option<&Tensor>,
        observe: F,
    ) -> candle_core::Result<Tensor>
    where
        F: FnMut(usize, &Tensor),
    {
        self.backbone.extract_features(source, padding_mask, observe)
    }
}
