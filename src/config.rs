//! Engine and session configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::tokenizer::DEFAULT_TOKENIZER_REPO;

/// Limits of the decoding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Total positions the model cache can hold (prompt + generated).
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,

    /// Audio duration covered by one codec frame.
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u32,
}

fn default_max_seq_len() -> usize {
    2048
}
fn default_frame_duration_ms() -> u32 {
    80
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_seq_len: default_max_seq_len(),
            frame_duration_ms: default_frame_duration_ms(),
        }
    }
}

/// Per-call generation knobs used when a request leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_max_audio_length_ms")]
    pub max_audio_length_ms: f64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fixed sampling seed; `None` draws from system time.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_audio_length_ms() -> f64 {
    90_000.0
}
fn default_temperature() -> f32 {
    0.9
}
fn default_top_k() -> usize {
    50
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_audio_length_ms: default_max_audio_length_ms(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            seed: None,
        }
    }
}

/// Session configuration for [`CsmRuntime`](crate::runtime::CsmRuntime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tokenizer file, directory or HuggingFace repo id.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,

    /// `auto`, `cpu`, `cuda`, `cuda:N` or `metal`.
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_load_watermark")]
    pub load_watermark: bool,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub defaults: GenerationDefaults,
}

fn default_tokenizer() -> String {
    DEFAULT_TOKENIZER_REPO.to_string()
}
fn default_device() -> String {
    "auto".to_string()
}
fn default_load_watermark() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tokenizer: default_tokenizer(),
            device: default_device(),
            load_watermark: default_load_watermark(),
            generator: GeneratorConfig::default(),
            defaults: GenerationDefaults::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a local JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generator.frame_duration_ms == 0 {
            anyhow::bail!("generator.frame_duration_ms must be positive");
        }
        if self.generator.max_seq_len == 0 {
            anyhow::bail!("generator.max_seq_len must be positive");
        }
        if !self.defaults.temperature.is_finite() || self.defaults.temperature < 0.0 {
            anyhow::bail!(
                "defaults.temperature must be a non-negative number, got {}",
                self.defaults.temperature
            );
        }
        Ok(())
    }
}
