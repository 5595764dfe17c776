//! Frame layout shared by the text and audio modalities.
//!
//! Every timestep fed to the model is a row of `K + 1` integer slots, where
//! `K` is the number of codec codebooks and the last slot carries a text
//! token. A parallel mask row marks which slots hold a valid token.
//!
//! Internally a timestep is a [`FrameSlot`] so that text and audio tokens can
//! never land in each other's slots. Rows are only materialised when a
//! [`TokenStream`] is projected into tensors for a model call.

use anyhow::Result;
use candle_core::{Device, Tensor};

use crate::error::EngineError;

/// Value written into every audio slot of an end-of-segment frame, and the
/// value a model emits across all codebooks to signal end of generation.
pub const AUDIO_SENTINEL: u32 = 0;

/// Contents of a single timestep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSlot {
    /// One sub-word text token, placed in the text slot.
    Text(u32),
    /// One codec value per codebook, placed in the audio slots.
    Audio(Vec<u32>),
    /// Nothing valid at this timestep.
    Empty,
}

impl FrameSlot {
    /// The synthetic end-of-segment frame appended after encoded audio.
    pub fn end_of_segment(num_codebooks: usize) -> Self {
        FrameSlot::Audio(vec![AUDIO_SENTINEL; num_codebooks])
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FrameSlot::Text(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, FrameSlot::Audio(_))
    }

    /// Append this slot's token row and mask row (each `K + 1` wide).
    fn write_row(&self, num_codebooks: usize, tokens: &mut Vec<i64>, mask: &mut Vec<u8>) {
        match self {
            FrameSlot::Text(id) => {
                tokens.extend(std::iter::repeat(0i64).take(num_codebooks));
                tokens.push(*id as i64);
                mask.extend(std::iter::repeat(0u8).take(num_codebooks));
                mask.push(1);
            }
            FrameSlot::Audio(codes) => {
                tokens.extend(codes.iter().map(|&c| c as i64));
                tokens.push(0);
                mask.extend(std::iter::repeat(1u8).take(num_codebooks));
                mask.push(0);
            }
            FrameSlot::Empty => {
                tokens.extend(std::iter::repeat(0i64).take(num_codebooks + 1));
                mask.extend(std::iter::repeat(0u8).take(num_codebooks + 1));
            }
        }
    }
}

/// Ordered, append-only sequence of timesteps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStream {
    num_codebooks: usize,
    frames: Vec<FrameSlot>,
}

impl TokenStream {
    pub fn new(num_codebooks: usize) -> Self {
        Self {
            num_codebooks,
            frames: Vec::new(),
        }
    }

    /// Number of codec codebooks (`K`).
    pub fn num_codebooks(&self) -> usize {
        self.num_codebooks
    }

    /// Row width, `K + 1`.
    pub fn width(&self) -> usize {
        self.num_codebooks + 1
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameSlot] {
        &self.frames
    }

    /// Append one timestep. Audio slots must carry exactly `K` values.
    pub fn push(&mut self, slot: FrameSlot) -> Result<()> {
        if let FrameSlot::Audio(codes) = &slot {
            if codes.len() != self.num_codebooks {
                return Err(EngineError::CodebookMismatch {
                    expected: self.num_codebooks,
                    actual: codes.len(),
                }
                .into());
            }
        }
        self.frames.push(slot);
        Ok(())
    }

    pub fn extend<I>(&mut self, slots: I) -> Result<()>
    where
        I: IntoIterator<Item = FrameSlot>,
    {
        for slot in slots {
            self.push(slot)?;
        }
        Ok(())
    }

    /// Project to `(tokens, mask)` tensors of shape `[1, S, K + 1]`.
    ///
    /// Tokens are `I64`; the mask is `U8` with 1 marking a valid slot.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let width = self.width();
        let len = self.frames.len();
        let mut tokens = Vec::with_capacity(len * width);
        let mut mask = Vec::with_capacity(len * width);
        for slot in &self.frames {
            slot.write_row(self.num_codebooks, &mut tokens, &mut mask);
        }
        let tokens = Tensor::from_vec(tokens, (1, len, width), device)?;
        let mask = Tensor::from_vec(mask, (1, len, width), device)?;
        Ok((tokens, mask))
    }
}

/// The tensors handed to the model for one step.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    /// `[1, S, K + 1]` I64 token ids.
    pub tokens: Tensor,
    /// `[1, S, K + 1]` U8 validity mask.
    pub mask: Tensor,
    /// `[1, S]` I64 absolute positions.
    pub positions: Tensor,
}

impl FrameWindow {
    /// Build a window over `stream` whose first row sits at `start_position`.
    pub fn from_stream(stream: &TokenStream, start_position: usize, device: &Device) -> Result<Self> {
        let (tokens, mask) = stream.to_tensors(device)?;
        let start = start_position as i64;
        let end = (start_position + stream.len()) as i64;
        let positions = Tensor::arange(start, end, device)?.unsqueeze(0)?;
        Ok(Self {
            tokens,
            mask,
            positions,
        })
    }

    /// Number of timesteps in the window.
    pub fn len(&self) -> Result<usize> {
        Ok(self.positions.dim(1)?)
    }
}
