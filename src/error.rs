//! Engine error taxonomy.
//!
//! The crate propagates `anyhow::Result` everywhere. Failures that originate
//! inside the engine (as opposed to a collaborator such as the model or the
//! codec) are raised as [`EngineError`] values so callers can tell them apart
//! with `err.downcast_ref::<EngineError>()`. Collaborator errors are passed
//! through untouched.

use thiserror::Error;

/// Errors raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The assembled prompt leaves no room for the requested generation length.
    #[error(
        "Inputs too long: prompt has {prompt_len} frames, must be below \
         max_seq_len - max_generation_len = {max_context_len}"
    )]
    ContextTooLong {
        prompt_len: usize,
        max_context_len: usize,
    },

    /// `max_audio_length_ms` was negative, NaN or infinite.
    #[error("max_audio_length_ms must be a finite non-negative number, got {0}")]
    InvalidAudioLength(f64),

    /// There is nothing to feed the model.
    #[error("prompt is empty: at least one text or audio frame is required")]
    EmptyPrompt,

    /// Segment audio is not at the engine's working sample rate.
    #[error("segment audio is {actual} Hz but the engine works at {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    /// The codec reported or produced a different number of codebooks.
    #[error("expected {expected} codebooks, got {actual}")]
    CodebookMismatch { expected: usize, actual: usize },

    /// The model returned a frame of the wrong width.
    #[error("model returned a frame with {actual} values, expected {expected}")]
    FrameWidth { expected: usize, actual: usize },

    /// Watermarking was requested but no embedder was supplied.
    #[error("watermarking is enabled but no watermark embedder was provided")]
    MissingWatermarker,
}

impl EngineError {
    /// Errors rejected up front, before any model compute.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::ContextTooLong { .. }
                | EngineError::InvalidAudioLength(_)
                | EngineError::EmptyPrompt
                | EngineError::SampleRateMismatch { .. }
                | EngineError::MissingWatermarker
        )
    }
}
