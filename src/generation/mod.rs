//! Frame generation
//!
//! This module provides:
//! - The [`FrameModel`] capability the decoding loop drives
//! - Seeded top-k sampling via [`SamplingContext`] for model implementors
//! - The [`FrameDecoder`] loop with its length guard

mod decoder;
mod sampling;

use anyhow::Result;
use candle_core::Tensor;

pub use decoder::{
    check_context, max_generation_len, stop_frame, DecodeOutcome, FrameDecoder, StopReason,
};
pub use sampling::{greedy_sample, sample_topk, SamplingContext, SamplingParams};

/// Next-frame oracle.
///
/// The model owns its weights; the key/value history lives in a separate
/// [`Cache`](FrameModel::Cache) value that the engine holds and lends to
/// each call.
pub trait FrameModel {
    /// Attention history carried between steps of one generation.
    type Cache;

    /// Allocate a cache for up to `max_batch_size` sequences.
    fn setup_caches(&self, max_batch_size: usize) -> Result<Self::Cache>;

    /// Clear all history so the next call starts a fresh sequence.
    fn reset_caches(&self, cache: &mut Self::Cache) -> Result<()>;

    /// Predict the next audio frame.
    ///
    /// `tokens` and `mask` are `[1, S, K + 1]` (I64 / U8), `positions` is
    /// `[1, S]` I64. Returns `K` integer codes as `[1, K]` or `[K]`; all
    /// zeros means end of audio.
    fn generate_frame(
        &self,
        cache: &mut Self::Cache,
        tokens: &Tensor,
        mask: &Tensor,
        positions: &Tensor,
        params: &SamplingParams,
        rng: &mut SamplingContext,
    ) -> Result<Tensor>;
}
