//! Neural audio codec boundary.
//!
//! The codec maps waveforms to `K` parallel streams of discrete codes and
//! back. Its internals (e.g. Mimi's residual quantizer) live outside this
//! crate; the engine only needs [`AudioCodec`].

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};

use crate::error::EngineError;

/// Generated audio tokens: one `Vec` of `K` codebook values per frame.
pub type FrameCodes = Vec<Vec<u32>>;

/// Waveform <-> code tensor conversion.
pub trait AudioCodec: Send + Sync {
    /// Number of parallel codebooks `K`.
    fn num_codebooks(&self) -> usize;

    /// Sample rate the codec encodes from and decodes to.
    fn sample_rate(&self) -> u32;

    /// `[1, 1, N]` F32 waveform to `[1, K, F]` integer codes.
    fn encode(&self, waveform: &Tensor) -> Result<Tensor>;

    /// `[1, K, T]` I64 codes to a waveform. Any shape is accepted on the way
    /// out; the caller flattens it.
    fn decode(&self, codes: &Tensor) -> Result<Tensor>;
}

/// Pack frame-major codes into the codec's `[1, K, T]` I64 layout.
///
/// `T = 0` yields an empty `[1, K, 0]` tensor.
pub fn codes_to_tensor(codes: &[Vec<u32>], num_codebooks: usize, device: &Device) -> Result<Tensor> {
    let num_frames = codes.len();
    if num_frames == 0 {
        return Ok(Tensor::zeros((1, num_codebooks, 0), DType::I64, device)?);
    }

    let mut data = vec![0i64; num_codebooks * num_frames];
    for (frame, frame_codes) in codes.iter().enumerate() {
        if frame_codes.len() != num_codebooks {
            return Err(EngineError::CodebookMismatch {
                expected: num_codebooks,
                actual: frame_codes.len(),
            }
            .into());
        }
        for (q, &code) in frame_codes.iter().enumerate() {
            data[q * num_frames + frame] = code as i64;
        }
    }

    Ok(Tensor::from_vec(data, (1, num_codebooks, num_frames), device)?)
}

/// Unpack a `[1, K, F]` (or `[K, F]`) code tensor into frame-major codes.
pub fn tensor_to_frame_codes(codes: &Tensor, num_codebooks: usize) -> Result<FrameCodes> {
    let codes = match codes.rank() {
        3 => codes.squeeze(0)?,
        2 => codes.clone(),
        rank => anyhow::bail!("codec returned a rank-{rank} code tensor, expected [1, K, F]"),
    };

    let actual = codes.dim(0)?;
    if actual != num_codebooks {
        return Err(EngineError::CodebookMismatch {
            expected: num_codebooks,
            actual,
        }
        .into());
    }

    let rows: Vec<Vec<i64>> = codes
        .to_dtype(DType::I64)?
        .t()?
        .contiguous()?
        .to_vec2()
        .context("Failed to read codec output")?;

    rows.into_iter()
        .map(|frame| {
            frame
                .into_iter()
                .map(|c| u32::try_from(c).with_context(|| format!("invalid codec value {c}")))
                .collect()
        })
        .collect()
}
