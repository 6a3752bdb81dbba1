use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::ModelConfig;
use crate::model::backbone::SpeechBackbone;

/// wav2vec2 fine-tuned for CTC: the trunk under the `wav2vec2.` prefix plus
/// a vocabulary projection head at the root, matching the fine-tuned
/// checkpoint layout.
pub struct Wav2Vec2ForCtc {
    backbone: SpeechBackbone,
    lm_head: Linear,
}

impl Wav2Vec2ForCtc {
    pub(crate) fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            backbone: SpeechBackbone::load(cfg, vb.pp("wav2vec2"))?,
            lm_head: candle_nn::linear(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.backbone.num_layers()
    }

    pub(crate) fn backbone(&self) -> &SpeechBackbone {
        &self.backbone
    }

    /// Per-frame vocabulary logits `(B, frames, vocab)`.
    pub fn forward(
        &self,
        source: &Tensor,
        padding_mask: Option<&Tensor>,
    ) -> candle_core::Result<Tensor> {
        let hidden = self
            .backbone
            .extract_features(source, padding_mask, |_, _| {})?;
        self.lm_head.forward(&hidden)
    }
}
