//! Autoregressive frame decoding loop.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use std::iter::FusedIterator;

use super::{FrameModel, SamplingContext, SamplingParams};
use crate::error::EngineError;
use crate::frame::{FrameSlot, FrameWindow, TokenStream, AUDIO_SENTINEL};

/// Why decoding ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model emitted an all-sentinel frame.
    Model,
    /// The model-call budget ran out.
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Init,
    Generating,
    Stopped(StopReason),
    Failed,
}

/// Everything a finished decode produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    /// Accepted frames, each `K` codes wide, in generation order.
    pub frames: Vec<Vec<u32>>,
    pub stop_reason: StopReason,
    /// Number of `generate_frame` calls made, including the stopping one.
    pub model_calls: usize,
}

/// Model-call budget for a requested audio length.
///
/// `floor(max_audio_length_ms / frame_duration_ms)`.
pub fn max_generation_len(max_audio_length_ms: f64, frame_duration_ms: u32) -> Result<usize> {
    if !max_audio_length_ms.is_finite() || max_audio_length_ms < 0.0 {
        return Err(EngineError::InvalidAudioLength(max_audio_length_ms).into());
    }
    if frame_duration_ms == 0 {
        anyhow::bail!("frame_duration_ms must be positive");
    }
    Ok((max_audio_length_ms / frame_duration_ms as f64).floor() as usize)
}

/// Reject prompts that leave no room for `max_generation_len` new frames.
pub fn check_context(prompt_len: usize, max_seq_len: usize, max_generation_len: usize) -> Result<()> {
    if prompt_len == 0 {
        return Err(EngineError::EmptyPrompt.into());
    }
    let max_context_len = max_seq_len.saturating_sub(max_generation_len);
    if prompt_len >= max_context_len {
        return Err(EngineError::ContextTooLong {
            prompt_len,
            max_context_len,
        }
        .into());
    }
    Ok(())
}

/// Bounded iterator over generated audio frames.
///
/// The first step feeds the whole prompt at positions `0..S`; every later
/// step feeds only the previously accepted frame at the next position, with
/// the model cache carrying the history. Iteration ends when the model emits
/// an all-zero frame (not yielded) or after `max_generation_len` model calls.
/// A collaborator error is yielded once, after which the decoder is fused.
///
/// The zero value doubles as a legitimate codebook entry, so a model that
/// genuinely wants to emit an all-zero frame cannot be told apart from one
/// signalling end of audio.
pub struct FrameDecoder<'a, M: FrameModel> {
    model: &'a M,
    cache: &'a mut M::Cache,
    params: SamplingParams,
    rng: SamplingContext,
    device: Device,
    num_codebooks: usize,
    window: FrameWindow,
    next_position: usize,
    max_generation_len: usize,
    model_calls: usize,
    state: DecoderState,
}

impl<'a, M: FrameModel> FrameDecoder<'a, M> {
    /// Validate the prompt against the length guard and build the first
    /// window. The cache is borrowed as-is; callers reset it beforehand.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: &'a M,
        cache: &'a mut M::Cache,
        prompt: &TokenStream,
        max_seq_len: usize,
        max_generation_len: usize,
        params: SamplingParams,
        rng: SamplingContext,
        device: &Device,
    ) -> Result<Self> {
        check_context(prompt.len(), max_seq_len, max_generation_len)?;
        let window = FrameWindow::from_stream(prompt, 0, device)?;

        Ok(Self {
            model,
            cache,
            params,
            rng,
            device: device.clone(),
            num_codebooks: prompt.num_codebooks(),
            window,
            next_position: prompt.len(),
            max_generation_len,
            model_calls: 0,
            state: DecoderState::Init,
        })
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls
    }

    /// `Some` once iteration has ended normally.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            DecoderState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }

    /// Drain the decoder. Errors discard the frames produced so far.
    pub fn run(mut self) -> Result<DecodeOutcome> {
        let mut frames = Vec::new();
        for frame in self.by_ref() {
            frames.push(frame?);
        }
        let stop_reason = self.stop_reason().unwrap_or(StopReason::Length);
        Ok(DecodeOutcome {
            frames,
            stop_reason,
            model_calls: self.model_calls,
        })
    }

    /// One model call. `Ok(None)` means the model signalled end of audio.
    fn step(&mut self) -> Result<Option<Vec<u32>>> {
        tracing::trace!(
            step = self.model_calls,
            position = self.next_position,
            "generate_frame"
        );

        let sample = self.model.generate_frame(
            self.cache,
            &self.window.tokens,
            &self.window.mask,
            &self.window.positions,
            &self.params,
            &mut self.rng,
        )?;
        self.model_calls += 1;

        let values: Vec<i64> = sample
            .flatten_all()?
            .to_dtype(DType::I64)?
            .to_vec1()
            .context("Failed to read generated frame")?;

        if values.len() != self.num_codebooks {
            return Err(EngineError::FrameWidth {
                expected: self.num_codebooks,
                actual: values.len(),
            }
            .into());
        }

        if values.iter().all(|&v| v == AUDIO_SENTINEL as i64) {
            return Ok(None);
        }

        let frame = values
            .into_iter()
            .map(|v| u32::try_from(v).with_context(|| format!("model emitted invalid code {v}")))
            .collect::<Result<Vec<u32>>>()?;

        let mut next = TokenStream::new(self.num_codebooks);
        next.push(FrameSlot::Audio(frame.clone()))?;
        self.window = FrameWindow::from_stream(&next, self.next_position, &self.device)?;
        self.next_position += 1;

        Ok(Some(frame))
    }
}

impl<M: FrameModel> Iterator for FrameDecoder<'_, M> {
    type Item = Result<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, DecoderState::Stopped(_) | DecoderState::Failed) {
            return None;
        }

        if self.model_calls >= self.max_generation_len {
            tracing::warn!(
                frames = self.model_calls,
                "generation hit max_audio_length_ms before the model stopped"
            );
            self.state = DecoderState::Stopped(StopReason::Length);
            return None;
        }

        self.state = DecoderState::Generating;
        match self.step() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.state = DecoderState::Stopped(StopReason::Model);
                None
            }
            Err(e) => {
                self.state = DecoderState::Failed;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            DecoderState::Stopped(_) | DecoderState::Failed => (0, Some(0)),
            DecoderState::Init | DecoderState::Generating => (
                0,
                Some(self.max_generation_len.saturating_sub(self.model_calls)),
            ),
        }
    }
}

impl<M: FrameModel> FusedIterator for FrameDecoder<'_, M> {}

/// Convenience for model implementors: an all-sentinel `[1, K]` frame.
pub fn stop_frame(num_codebooks: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::zeros((1, num_codebooks), DType::I64, device)?)
}
