//! Session wrapper driven by plain descriptors.
//!
//! [`CsmRuntime`] loads its collaborators once, then turns
//! [`GenerateRequest`]s that reference WAV files on disk into generated
//! audio. Context audio is downmixed to mono and resampled to the engine's
//! rate as it is loaded.

use anyhow::{Context, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::{load_wav, AudioBuffer, Resample, Resampler};
use crate::codec::AudioCodec;
use crate::config::RuntimeConfig;
use crate::error::EngineError;
use crate::generation::FrameModel;
use crate::generator::{GenerateOptions, GenerationReport, Generator};
use crate::segment::Segment;
use crate::tokenizer::{TextEncoder, TextTokenizer};
use crate::watermark::{WatermarkEmbedder, Watermarker};
use crate::{device_info, parse_device};

/// A context turn whose audio lives in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub speaker: u32,
    pub text: String,
    /// WAV file; a leading `~/` expands to `$HOME`.
    pub audio_path: PathBuf,
}

/// One generation request. Unset knobs fall back to the runtime's
/// [`GenerationDefaults`](crate::config::GenerationDefaults).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    pub speaker: u32,
    #[serde(default)]
    pub context: Vec<SegmentDescriptor>,
    #[serde(default)]
    pub max_audio_length_ms: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GenerateRequest {
    pub fn new(text: impl Into<String>, speaker: u32) -> Self {
        Self {
            text: text.into(),
            speaker,
            ..Default::default()
        }
    }

    fn options(&self, defaults: &GenerateOptions) -> GenerateOptions {
        GenerateOptions {
            max_audio_length_ms: self
                .max_audio_length_ms
                .unwrap_or(defaults.max_audio_length_ms),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            seed: self.seed.or(defaults.seed),
        }
    }
}

/// Generated audio as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisOutput {
    /// Mono samples; empty when the model stopped immediately.
    pub audio: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesisOutput {
    pub fn duration(&self) -> f32 {
        self.audio.len() as f32 / self.sample_rate as f32
    }

    /// 16-bit PCM WAV file contents.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        AudioBuffer::new(self.audio.clone(), self.sample_rate).to_wav_bytes()
    }
}

impl From<AudioBuffer> for SynthesisOutput {
    fn from(audio: AudioBuffer) -> Self {
        Self {
            audio: audio.samples,
            sample_rate: audio.sample_rate,
        }
    }
}

/// Serialized view returned by [`CsmRuntime::export_state`].
#[derive(Debug, Serialize)]
struct RuntimeState<'a> {
    sample_rate: u32,
    device: &'a str,
}

/// A loaded speech generation session.
pub struct CsmRuntime<M: FrameModel> {
    generator: Generator<M>,
    resampler: Box<dyn Resample>,
    config: RuntimeConfig,
    defaults: GenerateOptions,
}

impl<M: FrameModel> CsmRuntime<M> {
    /// Load the text tokenizer named by `config.tokenizer` and assemble a
    /// session around `model` and `codec`.
    ///
    /// With `config.load_watermark` set, `embedder` is required.
    pub fn new(
        config: RuntimeConfig,
        model: M,
        codec: Box<dyn AudioCodec>,
        embedder: Option<Box<dyn WatermarkEmbedder>>,
    ) -> Result<Self> {
        let tokenizer = TextTokenizer::from_pretrained(&config.tokenizer)
            .with_context(|| format!("Failed to load tokenizer '{}'", config.tokenizer))?;
        Self::from_parts(config, model, Box::new(tokenizer), codec, embedder)
    }

    /// Like [`new`](Self::new) with an already constructed text encoder.
    pub fn from_parts(
        config: RuntimeConfig,
        model: M,
        text_tokenizer: Box<dyn TextEncoder>,
        codec: Box<dyn AudioCodec>,
        embedder: Option<Box<dyn WatermarkEmbedder>>,
    ) -> Result<Self> {
        config.validate()?;
        let device = parse_device(&config.device)?;

        let watermarker = match (config.load_watermark, embedder) {
            (true, Some(embedder)) => Some(Watermarker::new(embedder)),
            (true, None) => return Err(EngineError::MissingWatermarker.into()),
            (false, Some(_)) => {
                tracing::debug!("watermarking disabled; ignoring supplied embedder");
                None
            }
            (false, None) => None,
        };

        tracing::info!(
            device = %device_info(&device),
            tokenizer = %config.tokenizer,
            "loading CSM runtime"
        );

        let generator = Generator::new(
            model,
            text_tokenizer,
            codec,
            watermarker,
            config.generator,
            device,
        )?;

        Ok(Self {
            generator,
            resampler: Box::new(Resampler::default()),
            defaults: config.defaults.into(),
            config,
        })
    }

    /// Replace the resampler used for context audio.
    pub fn with_resampler(mut self, resampler: Box<dyn Resample>) -> Self {
        self.resampler = resampler;
        self
    }

    /// Engine sample rate (the codec's).
    pub fn sample_rate(&self) -> u32 {
        self.generator.sample_rate()
    }

    pub fn device(&self) -> &Device {
        self.generator.device()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn generator(&self) -> &Generator<M> {
        &self.generator
    }

    /// Load, downmix and resample every descriptor into a [`Segment`].
    pub fn build_context(&self, descriptors: &[SegmentDescriptor]) -> Result<Vec<Segment>> {
        let rate = self.sample_rate();
        descriptors
            .iter()
            .map(|desc| {
                let path = expand_home(&desc.audio_path);
                let audio = load_wav(&path)
                    .with_context(|| format!("Failed to load context audio {}", path.display()))?;
                let audio = if audio.sample_rate != rate {
                    tracing::debug!(
                        path = %path.display(),
                        from = audio.sample_rate,
                        to = rate,
                        "resampling context audio"
                    );
                    self.resampler.resample(&audio, rate)?
                } else {
                    audio
                };
                Ok(Segment::new(desc.speaker, desc.text.clone(), audio))
            })
            .collect()
    }

    pub fn generate(&mut self, request: &GenerateRequest) -> Result<SynthesisOutput> {
        self.generate_with_report(request).map(|(output, _)| output)
    }

    pub fn generate_with_report(
        &mut self,
        request: &GenerateRequest,
    ) -> Result<(SynthesisOutput, GenerationReport)> {
        let segments = self.build_context(&request.context)?;
        let options = request.options(&self.defaults);
        let (audio, report) =
            self.generator
                .generate_with_report(&request.text, request.speaker, &segments, &options)?;
        Ok((audio.into(), report))
    }

    /// JSON snapshot: `{"sample_rate": .., "device": ..}`.
    pub fn export_state(&self) -> Result<String> {
        let state = RuntimeState {
            sample_rate: self.sample_rate(),
            device: &self.config.device,
        };
        serde_json::to_string(&state).context("Failed to serialize runtime state")
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
