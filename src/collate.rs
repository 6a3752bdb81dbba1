use candle_core::{Device, Tensor};

use crate::error::DistillError;

/// A batch of waveforms zero-padded to a common length, batch-major.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    /// `(batch, max_len)` f32 source samples.
    pub source: Tensor,
    /// `(batch, max_len)` f32 mask, 1.0 at padded positions.
    pub padding_mask: Tensor,
}

/// Pad a batch of variable-length waveforms and build the matching validity
/// mask. The mask is derived from the true lengths, so genuine zero samples
/// inside an utterance are not treated as padding.
pub fn collate_sources(batch: &[Vec<f32>], device: &Device) -> Result<PaddedBatch, DistillError> {
    if batch.is_empty() {
        return Err(DistillError::invalid_input("cannot collate an empty batch"));
    }

    let max_len = batch.iter().map(Vec::len).max().unwrap_or(0);
    let mut source = Vec::with_capacity(batch.len() * max_len);
    let mut mask = Vec::with_capacity(batch.len() * max_len);
    for row in batch {
        source.extend_from_slice(row);
        source.extend(std::iter::repeat(0f32).take(max_len - row.len()));
        mask.extend(std::iter::repeat(0f32).take(row.len()));
        mask.extend(std::iter::repeat(1f32).take(max_len - row.len()));
    }

    let shape = (batch.len(), max_len);
    let source = Tensor::from_vec(source, shape, device)
        .map_err(|e| DistillError::model("collate source tensor", e))?;
    let padding_mask = Tensor::from_vec(mask, shape, device)
        .map_err(|e| DistillError::model("collate mask tensor", e))?;
    Ok(PaddedBatch {
        source,
        padding_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_longest_row_and_masks_the_tail() {
        let batch = vec![vec![0.5f32, -0.5, 0.25], vec![1.0f32]];
        let padded = collate_sources(&batch, &Device::Cpu).expect("collate");

        assert_eq!(padded.source.dims(), &[2, 3]);
        assert_eq!(padded.padding_mask.dims(), &[2, 3]);

        let source = padded.source.to_vec2::<f32>().expect("source values");
        assert_eq!(source[0], [0.5, -0.5, 0.25]);
        assert_eq!(source[1], [1.0, 0.0, 0.0]);

        let mask = padded.padding_mask.to_vec2::<f32>().expect("mask values");
        assert_eq!(mask[0], [0.0, 0.0, 0.0]);
        assert_eq!(mask[1], [0.0, 1.0, 1.0]);
    }

    #[test]
    fn genuine_zero_samples_are_not_masked() {
        let batch = vec![vec![0.0f32, 0.0], vec![1.0f32, 2.0]];
        let padded = collate_sources(&batch, &Device::Cpu).expect("collate");
        let mask = padded.padding_mask.to_vec2::<f32>().expect("mask values");
        assert_eq!(mask[0], [0.0, 0.0]);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            collate_sources(&[], &Device::Cpu),
            Err(DistillError::InvalidInput { .. })
        ));
    }
}
