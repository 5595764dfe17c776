//! The `generate` operation: prompt assembly, frame decoding, codec decode
//! and optional watermarking.

use anyhow::{Context, Result};
use candle_core::Device;
use serde::Serialize;
use std::time::Instant;

use crate::audio::AudioBuffer;
use crate::codec::{codes_to_tensor, AudioCodec};
use crate::config::{GenerationDefaults, GeneratorConfig};
use crate::generation::{
    check_context, max_generation_len, FrameDecoder, FrameModel, SamplingContext, SamplingParams,
    StopReason,
};
use crate::segment::{build_prompt, Segment};
use crate::sync_device;
use crate::tokenizer::TextEncoder;
use crate::watermark::{watermarked_sample_rate, Watermarker};

/// Per-call generation options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    /// Upper bound on generated audio; `floor(ms / frame_duration_ms)` model calls.
    pub max_audio_length_ms: f64,
    pub temperature: f32,
    pub top_k: usize,
    /// Seed for the per-call sampling context. Same seed, same inputs, same audio.
    pub seed: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerationDefaults::default().into()
    }
}

impl From<GenerationDefaults> for GenerateOptions {
    fn from(defaults: GenerationDefaults) -> Self {
        Self {
            max_audio_length_ms: defaults.max_audio_length_ms,
            temperature: defaults.temperature,
            top_k: defaults.top_k,
            seed: defaults.seed,
        }
    }
}

impl GenerateOptions {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_k: self.top_k,
        }
    }
}

/// Per-stage timing breakdown from a generation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisTiming {
    /// Prompt tokenization, including reference-audio encoding (ms).
    pub prompt_ms: f64,
    /// The frame decoding loop (ms).
    pub generation_ms: f64,
    /// Codec decode of the generated frames (ms).
    pub decode_ms: f64,
    /// Watermark round trip; zero when disabled (ms).
    pub watermark_ms: f64,
}

/// What happened during one `generate` call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub stop_reason: StopReason,
    /// Accepted audio frames.
    pub frames: usize,
    pub model_calls: usize,
    pub prompt_frames: usize,
    pub timing: SynthesisTiming,
}

/// Speech generation engine around a [`FrameModel`].
///
/// Holds the model, its cache, the text tokenizer, the codec and an optional
/// watermarker. `generate` takes `&mut self`: one call runs at a time per
/// instance, and each call starts from a freshly reset cache.
pub struct Generator<M: FrameModel> {
    model: M,
    cache: M::Cache,
    text_tokenizer: Box<dyn TextEncoder>,
    codec: Box<dyn AudioCodec>,
    watermarker: Option<Watermarker>,
    config: GeneratorConfig,
    device: Device,
}

impl<M: FrameModel> Generator<M> {
    /// Allocate the model cache (batch size 1) and take ownership of the
    /// collaborators. `watermarker = None` disables watermarking.
    pub fn new(
        model: M,
        text_tokenizer: Box<dyn TextEncoder>,
        codec: Box<dyn AudioCodec>,
        watermarker: Option<Watermarker>,
        config: GeneratorConfig,
        device: Device,
    ) -> Result<Self> {
        if config.frame_duration_ms == 0 {
            anyhow::bail!("frame_duration_ms must be positive");
        }
        let cache = model
            .setup_caches(1)
            .context("Failed to allocate model cache")?;

        tracing::info!(
            sample_rate = codec.sample_rate(),
            num_codebooks = codec.num_codebooks(),
            watermark = watermarker.is_some(),
            max_seq_len = config.max_seq_len,
            "generator ready"
        );

        Ok(Self {
            model,
            cache,
            text_tokenizer,
            codec,
            watermarker,
            config,
            device,
        })
    }

    /// Codec sample rate; context audio must be at this rate.
    pub fn sample_rate(&self) -> u32 {
        self.codec.sample_rate()
    }

    /// Rate of the audio `generate` returns.
    pub fn output_sample_rate(&self) -> u32 {
        if self.watermarker.is_some() {
            watermarked_sample_rate(self.sample_rate())
        } else {
            self.sample_rate()
        }
    }

    pub fn num_codebooks(&self) -> usize {
        self.codec.num_codebooks()
    }

    pub fn watermark_enabled(&self) -> bool {
        self.watermarker.is_some()
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Generate speech for `text` spoken by `speaker`, conditioned on `context`.
    ///
    /// Returns an empty buffer when the model stops on its first step.
    pub fn generate(
        &mut self,
        text: &str,
        speaker: u32,
        context: &[Segment],
        options: &GenerateOptions,
    ) -> Result<AudioBuffer> {
        self.generate_with_report(text, speaker, context, options)
            .map(|(audio, _)| audio)
    }

    /// [`generate`](Self::generate) plus stop reason, frame counts and timing.
    pub fn generate_with_report(
        &mut self,
        text: &str,
        speaker: u32,
        context: &[Segment],
        options: &GenerateOptions,
    ) -> Result<(AudioBuffer, GenerationReport)> {
        let mut timing = SynthesisTiming::default();
        let max_gen = max_generation_len(options.max_audio_length_ms, self.config.frame_duration_ms)?;

        let t_prompt = Instant::now();
        let prompt = {
            #[cfg(feature = "profiling")]
            let _span = tracing::info_span!("prompt").entered();
            build_prompt(
                self.text_tokenizer.as_ref(),
                self.codec.as_ref(),
                context,
                text,
                speaker,
                &self.device,
            )?
        };
        sync_device(&self.device)?;
        timing.prompt_ms = t_prompt.elapsed().as_secs_f64() * 1000.0;

        check_context(prompt.len(), self.config.max_seq_len, max_gen)?;
        self.model
            .reset_caches(&mut self.cache)
            .context("Failed to reset model cache")?;

        let t_gen = Instant::now();
        let outcome = {
            #[cfg(feature = "profiling")]
            let _span = tracing::info_span!("decode_loop").entered();
            FrameDecoder::new(
                &self.model,
                &mut self.cache,
                &prompt,
                self.config.max_seq_len,
                max_gen,
                options.sampling_params(),
                SamplingContext::new(options.seed),
                &self.device,
            )?
            .run()?
        };
        sync_device(&self.device)?;
        timing.generation_ms = t_gen.elapsed().as_secs_f64() * 1000.0;

        let mut report = GenerationReport {
            stop_reason: outcome.stop_reason,
            frames: outcome.frames.len(),
            model_calls: outcome.model_calls,
            prompt_frames: prompt.len(),
            timing,
        };

        if outcome.frames.is_empty() {
            tracing::info!(
                prompt_frames = report.prompt_frames,
                "model stopped before producing audio"
            );
            return Ok((AudioBuffer::empty(self.output_sample_rate()), report));
        }

        let t_decode = Instant::now();
        let audio = {
            #[cfg(feature = "profiling")]
            let _span = tracing::info_span!("codec_decode").entered();
            let codes = codes_to_tensor(&outcome.frames, self.codec.num_codebooks(), &self.device)?;
            let waveform = self
                .codec
                .decode(&codes)
                .context("Failed to decode generated frames")?;
            AudioBuffer::from_tensor(waveform, self.codec.sample_rate())?
        };
        sync_device(&self.device)?;
        report.timing.decode_ms = t_decode.elapsed().as_secs_f64() * 1000.0;

        let audio = match &self.watermarker {
            Some(watermarker) => {
                let t_wm = Instant::now();
                let marked = watermarker.apply(&audio)?;
                report.timing.watermark_ms = t_wm.elapsed().as_secs_f64() * 1000.0;
                marked
            }
            None => audio,
        };

        tracing::info!(
            frames = report.frames,
            stop_reason = ?report.stop_reason,
            samples = audio.len(),
            sample_rate = audio.sample_rate,
            generation_ms = report.timing.generation_ms,
            "generated audio"
        );

        Ok((audio, report))
    }
}

impl<M: FrameModel> std::fmt::Debug for Generator<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .field("sample_rate", &self.sample_rate())
            .field("watermark", &self.watermarker.is_some())
            .finish_non_exhaustive()
    }
}
