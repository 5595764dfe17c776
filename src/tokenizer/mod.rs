//! Text tokenization
//!
//! Uses HuggingFace's tokenizers library for the sub-word vocabulary. The
//! engine only depends on the [`TextEncoder`] capability, so any encoder can
//! be plugged in; [`TextTokenizer`] is the stock implementation.

mod text;

use anyhow::Result;

pub use text::{TextTokenizer, BOS_TOKEN, DEFAULT_TOKENIZER_REPO, EOS_TOKEN};

#[cfg(test)]
pub(crate) use text::create_mock_tokenizer;

/// Sub-word text encoder consumed by the segment tokenizer.
pub trait TextEncoder: Send + Sync {
    /// Encode an already formatted string into sub-word ids.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

/// Prefix `text` with its speaker tag, e.g. `[0]Hello`.
///
/// The tag is part of the tokenized text; speakers have no channel of their own.
pub fn speaker_prompt(speaker: u32, text: &str) -> String {
    format!("[{speaker}]{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_prompt_format() {
        assert_eq!(speaker_prompt(0, "Hello"), "[0]Hello");
        assert_eq!(speaker_prompt(12, ""), "[12]");
    }
}
