use candle_core::{Device, Tensor};

use crate::error::DistillError;

/// Output representation produced by [`CtcCollapser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollapseMode {
    /// Collapsed ids as an `I64` tensor, for downstream tensor consumption.
    Tensor,
    /// Collapsed ids as a plain `Vec<i64>`, for text post-processing.
    #[default]
    Plain,
}

#[derive(Debug, Clone)]
pub enum CollapsedSequence {
    Tensor(Tensor),
    Plain(Vec<i64>),
}

impl CollapsedSequence {
    pub fn len(&self) -> usize {
        match self {
            Self::Tensor(t) => t.elem_count(),
            Self::Plain(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract the collapsed ids regardless of representation.
    pub fn into_ids(self) -> Result<Vec<i64>, DistillError> {
        match self {
            Self::Plain(ids) => Ok(ids),
            Self::Tensor(t) => t
                .to_vec1::<i64>()
                .map_err(|e| DistillError::model("read collapsed tensor", e)),
        }
    }
}

/// Collapse a raw per-frame CTC label sequence: merge adjacent equal ids,
/// then drop every blank.
///
/// Merging happens before blank removal, so repeats separated only by blank
/// frames survive as distinct labels (`[1, 0, 1]` collapses to `[1, 1]`).
/// Total over all inputs; relative order of surviving ids is preserved.
pub fn collapse_ids(ids: &[i64], blank_id: i64) -> Vec<i64> {
    let mut out = Vec::with_capacity(ids.len());
    let mut prev = None;
    for &id in ids {
        if prev != Some(id) {
            if id != blank_id {
                out.push(id);
            }
            prev = Some(id);
        }
    }
    out
}

/// Stateless transform from raw per-frame token ids to a deduplicated,
/// blank-stripped label sequence.
pub struct CtcCollapser {
    blank_id: i64,
    mode: CollapseMode,
    device: Device,
}

impl CtcCollapser {
    pub fn new(blank_id: i64) -> Self {
        Self {
            blank_id,
            mode: CollapseMode::default(),
            device: Device::Cpu,
        }
    }

    pub fn with_mode(mut self, mode: CollapseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Device for tensors produced in [`CollapseMode::Tensor`].
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn blank_id(&self) -> i64 {
        self.blank_id
    }

    pub fn collapse(&self, ids: &[i64]) -> Result<CollapsedSequence, DistillError> {
        let collapsed = collapse_ids(ids, self.blank_id);
        match self.mode {
            CollapseMode::Plain => Ok(CollapsedSequence::Plain(collapsed)),
            CollapseMode::Tensor => {
                let len = collapsed.len();
                Tensor::from_vec(collapsed, len, &self.device)
                    .map(CollapsedSequence::Tensor)
                    .map_err(|e| DistillError::model("collapsed tensor creation", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::BLANK_ID;

    #[test]
    fn empty_input_collapses_to_empty() {
        assert!(collapse_ids(&[], BLANK_ID).is_empty());
    }

    #[test]
    fn all_blank_input_collapses_to_empty() {
        assert!(collapse_ids(&[0, 0, 0], BLANK_ID).is_empty());
    }

    #[test]
    fn runs_merge_and_blanks_drop() {
        assert_eq!(collapse_ids(&[0, 5, 5, 0, 0, 6, 6, 6, 4, 7, 0], BLANK_ID), [5, 6, 4, 7]);
    }

    #[test]
    fn blank_separated_repeats_survive() {
        // The blank between the two runs is what distinguishes a repeated
        // label from a long run of the same label.
        assert_eq!(collapse_ids(&[1, 0, 1], BLANK_ID), [1, 1]);
        assert_eq!(collapse_ids(&[1, 1, 1], BLANK_ID), [1]);
    }

    #[test]
    fn collapse_is_idempotent_without_blank_separated_repeats() {
        let raw = vec![0, 5, 5, 6, 0, 0, 4, 4, 7, 0];
        let once = collapse_ids(&raw, BLANK_ID);
        assert_eq!(collapse_ids(&once, BLANK_ID), once);
    }

    #[test]
    fn non_default_blank_id_is_honored() {
        use crate::vocab::PAD_ID;
        assert_eq!(collapse_ids(&[1, 1, 5, 1], PAD_ID), [5]);
        assert_eq!(collapse_ids(&[1, 1, 5, 1], BLANK_ID), [1, 5, 1]);
    }

    #[test]
    fn plain_and_tensor_modes_agree() {
        let raw = [0i64, 5, 5, 6, 0, 4, 7];
        let plain = CtcCollapser::new(BLANK_ID)
            .collapse(&raw)
            .unwrap()
            .into_ids()
            .unwrap();
        let tensor = CtcCollapser::new(BLANK_ID)
            .with_mode(CollapseMode::Tensor)
            .collapse(&raw)
            .unwrap();
        assert!(matches!(tensor, CollapsedSequence::Tensor(_)));
        assert_eq!(tensor.into_ids().unwrap(), plain);
    }

    #[test]
    fn tensor_mode_handles_empty_output() {
        let collapsed = CtcCollapser::new(BLANK_ID)
            .with_mode(CollapseMode::Tensor)
            .collapse(&[0, 0])
            .unwrap();
        assert!(collapsed.is_empty());
        assert!(collapsed.into_ids().unwrap().is_empty());
    }
}
