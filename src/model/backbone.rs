use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

use crate::config::ModelConfig;
use crate::model::encoder::Encoder;
use crate::model::feature_extractor::FeatureExtractor;
use crate::model::feature_projection::FeatureProjection;

/// Additive score applied to padded attention keys. Large enough to zero
/// them out after softmax without producing NaN on fully-masked rows.
const ATTN_MASK_BIAS: f64 = -1e4;

/// Shared wav2vec2/HuBERT trunk: conv feature extractor, projection into the
/// encoder width, transformer encoder.
pub(crate) struct SpeechBackbone {
    cfg: ModelConfig,
    feature_extractor: FeatureExtractor,
    feature_projection: FeatureProjection,
    encoder: Encoder,
}

impl SpeechBackbone {
    pub(crate) fn load(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            feature_extractor: FeatureExtractor::load(cfg, vb.pp("feature_extractor"))?,
            feature_projection: FeatureProjection::load(cfg, vb.pp("feature_projection"))?,
            encoder: Encoder::load(cfg, vb.pp("encoder"))?,
        })
    }

    pub(crate) fn num_layers(&self) -> usize {
        self.encoder.num_layers()
    }

    /// Forward `source` `(B, samples)` through the trunk, invoking `observe`
    /// with each encoder layer's output. `padding_mask` is an optional
    /// `(B, samples)` validity mask, 1.0 at padded positions; it is
    /// downsampled through the conv geometry, padded frames are zeroed after
    /// projection, and an additive bias keeps attention off them.
    pub(crate) fn extract_features<F>(
        &self,
        source: &Tensor,
        padding_mask: Option<&Tensor>,
        observe: F,
    ) -> candle_core::Result<Tensor>
    where
        F: FnMut(usize, &Tensor),
    {
        let h = self.feature_extractor.forward(&source.unsqueeze(1)?)?;
        let h = self
            .feature_projection
            .forward(&h.transpose(1, 2)?.contiguous()?)?;

        let (h, attn_bias) = match padding_mask {
            Some(mask) => {
                let frame_mask = self.frame_padding_mask(mask, h.dim(1)?)?;
                let keep = frame_mask.affine(-1.0, 1.0)?;
                let h = h.broadcast_mul(&keep.unsqueeze(2)?)?;
                let (b, t) = frame_mask.dims2()?;
                let bias = (frame_mask.reshape((b, 1, 1, t))? * ATTN_MASK_BIAS)?;
                (h, Some(bias))
            }
            None => (h, None),
        };

        self.encoder.forward_observed(&h, attn_bias.as_ref(), observe)
    }

    /// Downsample a sample-level padding mask to frame resolution using the
    /// conv stack's kernel/stride geometry. Padding is assumed to be a
    /// suffix, as produced by the batch collator.
    fn frame_padding_mask(
        &self,
        padding_mask: &Tensor,
        num_frames: usize,
    ) -> candle_core::Result<Tensor> {
        let rows = padding_mask.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let batch = rows.len();

        let mut mask = Vec::with_capacity(batch * num_frames);
        for row in &rows {
            let valid_samples = row.iter().filter(|&&v| v == 0.0).count();
            let valid_frames = self.cfg.conv_output_length(valid_samples).min(num_frames);
            mask.extend(std::iter::repeat(0f32).take(valid_frames));
            mask.extend(std::iter::repeat(1f32).take(num_frames - valid_frames));
        }
        Tensor::from_vec(mask, (batch, num_frames), padding_mask.device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_backbone() -> (SpeechBackbone, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let backbone = SpeechBackbone::load(&crate::model::testing::tiny_config("wav2vec2"), vb)
            .expect("build backbone");
        (backbone, varmap)
    }

    #[test]
    fn extract_features_produces_batch_major_frames() {
        let (backbone, _varmap) = tiny_backbone();
        let source = Tensor::zeros((2, 21), DType::F32, &Device::Cpu).expect("source");
        let hidden = backbone
            .extract_features(&source, None, |_, _| {})
            .expect("forward");
        // (21 - 3) / 2 + 1 = 10 frames at encoder width.
        assert_eq!(hidden.dims(), &[2, 10, 8]);
    }

    #[test]
    fn observer_sees_every_layer_in_order() {
        let (backbone, _varmap) = tiny_backbone();
        let source = Tensor::zeros((1, 21), DType::F32, &Device::Cpu).expect("source");
        let mut seen = Vec::new();
        backbone
            .extract_features(&source, None, |idx, out| {
                seen.push((idx, out.dims().to_vec()));
            })
            .expect("forward");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
        assert_eq!(seen[0].1, vec![1, 10, 8]);
    }

    #[test]
    fn frame_mask_tracks_conv_geometry() {
        let (backbone, _varmap) = tiny_backbone();
        // Row 0: all 21 samples valid -> 10 valid frames.
        // Row 1: 11 valid samples -> (11 - 3) / 2 + 1 = 5 valid frames.
        let mut mask = vec![0f32; 21];
        mask.extend(vec![0f32; 11]);
        mask.extend(vec![1f32; 10]);
        let mask = Tensor::from_vec(mask, (2, 21), &Device::Cpu).expect("mask");

        let frame_mask = backbone.frame_padding_mask(&mask, 10).expect("frame mask");
        let rows = frame_mask.to_vec2::<f32>().expect("rows");
        assert!(rows[0].iter().all(|&v| v == 0.0));
        assert_eq!(rows[1][..5], [0.0; 5]);
        assert_eq!(rows[1][5..], [1.0; 5]);
    }

    #[test]
    fn masked_forward_matches_output_shape() {
        let (backbone, _varmap) = tiny_backbone();
        let source = Tensor::zeros((2, 21), DType::F32, &Device::Cpu).expect("source");
        let mut mask = vec![0f32; 21];
        mask.extend(vec![0f32; 11]);
        mask.extend(vec![1f32; 10]);
        let mask = Tensor::from_vec(mask, (2, 21), &Device::Cpu).expect("mask");

        let hidden = backbone
            .extract_features(&source, Some(&mask), |_, _| {})
            .expect("masked forward");
        assert_eq!(hidden.dims(), &[2, 10, 8]);
    }
}
