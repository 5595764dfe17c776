//! # csm-engine
//!
//! Autoregressive speech-token generation for CSM-style conversational
//! speech models, built on [candle](https://github.com/huggingface/candle).
//!
//! The engine interleaves text and reference audio into a single stream of
//! fixed-width frames, drives a next-frame model one frame at a time, decodes
//! the generated codes back to a waveform and optionally watermarks it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csm_engine::{CsmRuntime, GenerateRequest, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("runtime.json")?;
//! let mut runtime = CsmRuntime::new(config, model, Box::new(mimi), Some(Box::new(embedder)))?;
//!
//! let request = GenerateRequest::new("Hello there.", 0);
//! let output = runtime.generate(&request)?;
//! std::fs::write("out.wav", output.to_wav_bytes()?)?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Prompt assembly** ([`segment`]): each context turn becomes its
//!    speaker-tagged sub-word frames, its codec frames and an end-of-segment
//!    frame; the target text follows.
//!
//! 2. **Frame decoding** ([`generation`]): a bounded iterator calls the
//!    [`FrameModel`] until it emits an all-zero frame or the length budget
//!    derived from `max_audio_length_ms` runs out. The model's cache is
//!    reset at the start of every call.
//!
//! 3. **Codec decode and watermark** ([`codec`], [`watermark`]): generated
//!    frames are packed as `[1, K, T]` codes, decoded, and passed through the
//!    watermark round trip when enabled.
//!
//! The model, the codec and the watermark embedder are capabilities
//! supplied by the caller; this crate owns the frame layout, the loop and
//! the bookkeeping around them.
//!
//! ## Sample Rate
//!
//! Context audio must match the codec rate (24 kHz for Mimi);
//! [`CsmRuntime`] resamples files on load. Watermarked output is at
//! `min(44.1 kHz, codec rate)`.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod generation;
pub mod generator;
pub mod profiling;
pub mod runtime;
pub mod segment;
pub mod tokenizer;
pub mod watermark;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Re-exports for convenience
pub use audio::AudioBuffer;
pub use codec::{AudioCodec, FrameCodes};
pub use config::{GenerationDefaults, GeneratorConfig, RuntimeConfig};
pub use error::EngineError;
pub use frame::{FrameSlot, TokenStream};
pub use generation::{FrameModel, SamplingContext, SamplingParams, StopReason};
pub use generator::{GenerateOptions, GenerationReport, Generator, SynthesisTiming};
pub use runtime::{CsmRuntime, GenerateRequest, SegmentDescriptor, SynthesisOutput};
pub use segment::Segment;
pub use tokenizer::{TextEncoder, TextTokenizer};
pub use watermark::{WatermarkEmbedder, Watermarker, CSM_1B_GH_WATERMARK};

/// Force the GPU to complete all pending work before returning.
///
/// GPU operations are asynchronous, so `Instant::now()` alone would measure
/// submission time. Reading a scalar back forces completion. No-op on CPU.
pub fn sync_device(device: &Device) -> Result<()> {
    match device {
        Device::Cpu => Ok(()),
        _ => {
            let _: Vec<f32> = Tensor::zeros(1, DType::F32, device)?.to_vec1()?;
            Ok(())
        }
    }
}

/// Select the best available device: CUDA, then Metal, then CPU.
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats: `auto`, `cpu`, `cuda`, `cuda:N`, `metal`
/// (case-insensitive).
pub fn parse_device(device_str: &str) -> Result<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid CUDA device index: {e}"))?,
                    None => 0,
                };
                Device::cuda_if_available(ordinal)
                    .map_err(|e| anyhow::anyhow!("failed to init CUDA device {ordinal}: {e}"))
            }
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("CUDA support not compiled in ('{s}'). Rebuild with --features cuda")
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)
                    .map_err(|e| anyhow::anyhow!("failed to init Metal device: {e}"))
            }
            #[cfg(not(feature = "metal"))]
            anyhow::bail!("Metal support not compiled in. Rebuild with --features metal")
        }
        other => {
            anyhow::bail!("unknown device '{other}'. Supported: auto, cpu, cuda, cuda:N, metal")
        }
    }
}

/// Human-readable label for a [`Device`].
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_device() {
        let device = auto_device().unwrap();
        assert!(
            matches!(device, Device::Cpu)
                || matches!(device, Device::Cuda(_))
                || matches!(device, Device::Metal(_))
        );
    }

    #[test]
    fn test_parse_device_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(parse_device("CPU").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_parse_device_unknown() {
        let err = parse_device("tpu").unwrap_err();
        assert!(err.to_string().contains("unknown device"));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_parse_device_cuda_without_feature() {
        assert!(parse_device("cuda:1").is_err());
    }

    #[test]
    fn test_device_info() {
        assert_eq!(device_info(&Device::Cpu), "CPU");
    }

    #[test]
    fn test_sync_device_cpu_noop() {
        sync_device(&Device::Cpu).unwrap();
    }
}
