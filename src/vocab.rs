//! Fixed character vocabulary shared by the English wav2vec2 CTC models.
//!
//! The table is immutable and process-wide; models trained against it encode
//! letters as ids 5..=31, with ids 0..=3 reserved for control symbols and
//! id 4 for the word separator.

use crate::error::DistillError;

pub const VOCAB_SIZE: usize = 32;

pub const BOS_ID: i64 = 0;
pub const PAD_ID: i64 = 1;
pub const EOS_ID: i64 = 2;
pub const UNK_ID: i64 = 3;
pub const WORD_SEP_ID: i64 = 4;

/// Default CTC blank id. The shipped English character models emit blank in
/// the `<s>` slot; whether a given model blanks on id 0 or on the pad id is a
/// training-time convention, so the collapser takes the blank id explicitly.
pub const BLANK_ID: i64 = BOS_ID;

pub const BOS: &str = "<s>";
pub const WORD_SEP: char = '|';

const SYMBOLS: [&str; VOCAB_SIZE] = [
    "<s>", "<pad>", "</s>", "<unk>", "|", "E", "T", "A", "O", "N", "I", "H", "S", "R", "D", "L",
    "U", "M", "W", "C", "F", "G", "Y", "P", "B", "V", "K", "'", "X", "J", "Q", "Z",
];

/// Look up the symbol for a token id.
pub fn symbol(id: i64) -> Result<&'static str, DistillError> {
    usize::try_from(id)
        .ok()
        .and_then(|idx| SYMBOLS.get(idx))
        .copied()
        .ok_or(DistillError::IdOutOfRange {
            id,
            vocab_size: VOCAB_SIZE,
        })
}

/// Reverse lookup; `None` for symbols outside the table.
pub fn id(symbol: &str) -> Option<i64> {
    SYMBOLS.iter().position(|&s| s == symbol).map(|idx| idx as i64)
}

pub fn symbols() -> &'static [&'static str; VOCAB_SIZE] {
    &SYMBOLS
}
