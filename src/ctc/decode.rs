use crate::error::DistillError;
use crate::vocab;

/// Maps label-id sequences to human-readable text using the fixed vocabulary.
///
/// Safe to call on raw, un-collapsed frame sequences: adjacent duplicate
/// symbols are merged before text assembly, so the decoder is idempotent
/// under CTC run-length collapse.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl TextDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a sequence of token ids into word-tokenized text.
    ///
    /// Fails with [`DistillError::IdOutOfRange`] for any id outside the
    /// 32-symbol table; otherwise total.
    pub fn decode(&self, ids: &[i64]) -> Result<String, DistillError> {
        let mut fused: Vec<&'static str> = Vec::with_capacity(ids.len());
        for &id in ids {
            let sym = vocab::symbol(id)?;
            if fused.last() != Some(&sym) {
                fused.push(sym);
            }
        }

        let joined = fused.concat().replace(vocab::BOS, "");
        let text = joined
            .split(vocab::WORD_SEP)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text.trim_end().to_string())
    }
}
