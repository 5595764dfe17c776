//! Text tokenizer wrapper for the Llama-3 style sub-word vocabulary

use anyhow::{anyhow, Result};
use std::path::Path;
use tokenizers::processors::template::TemplateProcessing;
use tokenizers::Tokenizer;

use super::TextEncoder;

/// Beginning-of-text marker added in front of every encoded string.
pub const BOS_TOKEN: &str = "<|begin_of_text|>";
/// End-of-text marker added after every encoded string.
pub const EOS_TOKEN: &str = "<|end_of_text|>";

/// Llama 3.2 defaults, used when the vocabulary doesn't carry the markers.
const DEFAULT_BOS_ID: u32 = 128000;
const DEFAULT_EOS_ID: u32 = 128001;

/// Default HuggingFace repo for the text tokenizer.
pub const DEFAULT_TOKENIZER_REPO: &str = "meta-llama/Llama-3.2-1B";

/// Text tokenizer wrapping HuggingFace tokenizers.
///
/// Every encode call is framed as `BOS $text EOS` by a template
/// post-processor, so each string yields exactly one sub-word sequence with
/// its own markers.
#[derive(Debug)]
pub struct TextTokenizer {
    tokenizer: Tokenizer,
    /// Beginning of text token ID
    pub bos_token_id: u32,
    /// End of text token ID
    pub eos_token_id: u32,
}

/// Create a simple mock tokenizer for testing
#[cfg(test)]
pub(crate) fn create_mock_tokenizer() -> Tokenizer {
    use tokenizers::models::bpe::BPE;
    use tokenizers::pre_tokenizers::whitespace::Whitespace;

    let vocab: [(&str, u32); 9] = [
        (BOS_TOKEN, 0),
        (EOS_TOKEN, 1),
        ("[", 2),
        ("]", 3),
        ("0", 4),
        ("1", 5),
        ("H", 6),
        ("i", 7),
        ("[UNK]", 8),
    ];

    let merges: Vec<(String, String)> = vec![];
    let bpe = BPE::builder()
        .vocab_and_merges(vocab.map(|(k, v)| (k.to_string(), v)), merges)
        .unk_token("[UNK]".to_string())
        .build()
        .unwrap();

    let mut tokenizer = Tokenizer::new(bpe);
    tokenizer.with_pre_tokenizer(Some(Whitespace));
    tokenizer
}

impl TextTokenizer {
    /// Load tokenizer from a local path or HuggingFace model ID.
    ///
    /// Resolution order:
    /// 1. Direct file path to `tokenizer.json`
    /// 2. Directory containing `tokenizer.json`
    /// 3. HuggingFace Hub download (if `hub` feature enabled)
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let path = Path::new(model_id);

        if path.is_file() {
            return Self::from_file(path);
        }

        if path.join("tokenizer.json").exists() {
            return Self::from_file(path.join("tokenizer.json"));
        }

        if path.is_dir() {
            anyhow::bail!(
                "No tokenizer files found in '{}'. Expected tokenizer.json.",
                model_id
            );
        }

        #[cfg(feature = "hub")]
        {
            tracing::info!("Downloading tokenizer from HuggingFace Hub: {}", model_id);
            let api = hf_hub::api::sync::Api::new()
                .map_err(|e| anyhow!("Failed to create HuggingFace API: {}", e))?;
            let file = api
                .model(model_id.to_string())
                .get("tokenizer.json")
                .map_err(|e| anyhow!("Failed to download tokenizer from '{}': {}", model_id, e))?;
            Self::from_file(&file)
        }

        #[cfg(not(feature = "hub"))]
        Err(anyhow!(
            "No tokenizer found at '{}' and hub feature is disabled",
            model_id
        ))
    }

    /// Load tokenizer from a local file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;

        Self::from_tokenizer(tokenizer)
    }

    /// Create from a tokenizers::Tokenizer instance, installing the
    /// BOS/EOS template post-processor.
    pub fn from_tokenizer(mut tokenizer: Tokenizer) -> Result<Self> {
        let bos_token_id = tokenizer.token_to_id(BOS_TOKEN).unwrap_or(DEFAULT_BOS_ID);
        let eos_token_id = tokenizer.token_to_id(EOS_TOKEN).unwrap_or(DEFAULT_EOS_ID);

        let template = TemplateProcessing::builder()
            .try_single(format!("{BOS_TOKEN}:0 $A:0 {EOS_TOKEN}:0"))
            .map_err(|e| anyhow!("Invalid single-sequence template: {}", e))?
            .try_pair(format!(
                "{BOS_TOKEN}:0 $A:0 {EOS_TOKEN}:0 {BOS_TOKEN}:1 $B:1 {EOS_TOKEN}:1"
            ))
            .map_err(|e| anyhow!("Invalid pair template: {}", e))?
            .special_tokens(vec![(BOS_TOKEN, bos_token_id), (EOS_TOKEN, eos_token_id)])
            .build()
            .map_err(|e| anyhow!("Failed to build template post-processor: {}", e))?;
        tokenizer.with_post_processor(Some(template));

        Ok(Self {
            tokenizer,
            bos_token_id,
            eos_token_id,
        })
    }

    /// Encode text to token IDs, framed with BOS/EOS
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Failed to encode text: {}", e))?;

        Ok(encoding.get_ids().to_vec())
    }
}

impl TextEncoder for TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        TextTokenizer::encode(self, text)
    }
}
