//! Conversation segments and prompt assembly.
//!
//! A segment is one speaker turn: its transcript and, for context turns, the
//! recorded audio. Tokenizing a segment yields its text frames followed by
//! its audio frames and a trailing end-of-segment frame.

use anyhow::{Context, Result};
use candle_core::Device;

use crate::audio::AudioBuffer;
use crate::codec::{tensor_to_frame_codes, AudioCodec};
use crate::error::EngineError;
use crate::frame::{FrameSlot, TokenStream};
use crate::tokenizer::{speaker_prompt, TextEncoder};

/// One speaker turn with its reference audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    speaker: u32,
    text: String,
    audio: AudioBuffer,
}

impl Segment {
    /// `audio` must be mono at the engine's sample rate; this is checked
    /// when the segment is tokenized.
    pub fn new(speaker: u32, text: impl Into<String>, audio: AudioBuffer) -> Self {
        Self {
            speaker,
            text: text.into(),
            audio,
        }
    }

    pub fn speaker(&self) -> u32 {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn audio(&self) -> &AudioBuffer {
        &self.audio
    }
}

/// One `Text` frame per sub-word of `[speaker]text`.
pub fn tokenize_text_segment(
    encoder: &dyn TextEncoder,
    text: &str,
    speaker: u32,
) -> Result<Vec<FrameSlot>> {
    let ids = encoder
        .encode(&speaker_prompt(speaker, text))
        .context("Failed to tokenize segment text")?;
    Ok(ids.into_iter().map(FrameSlot::Text).collect())
}

/// Codec frames for `audio`, plus the end-of-segment frame.
pub fn tokenize_audio(
    codec: &dyn AudioCodec,
    audio: &AudioBuffer,
    device: &Device,
) -> Result<Vec<FrameSlot>> {
    let expected = codec.sample_rate();
    if audio.sample_rate != expected {
        return Err(EngineError::SampleRateMismatch {
            expected,
            actual: audio.sample_rate,
        }
        .into());
    }

    let num_codebooks = codec.num_codebooks();
    let codes = codec
        .encode(&audio.to_tensor(device)?)
        .context("Failed to encode reference audio")?;
    let frames = tensor_to_frame_codes(&codes, num_codebooks)?;

    let mut slots: Vec<FrameSlot> = frames.into_iter().map(FrameSlot::Audio).collect();
    slots.push(FrameSlot::end_of_segment(num_codebooks));
    Ok(slots)
}

/// Text frames then audio frames of one context segment.
pub fn tokenize_segment(
    encoder: &dyn TextEncoder,
    codec: &dyn AudioCodec,
    segment: &Segment,
    device: &Device,
) -> Result<Vec<FrameSlot>> {
    let mut slots = tokenize_text_segment(encoder, &segment.text, segment.speaker)?;
    slots.extend(tokenize_audio(codec, &segment.audio, device)?);
    Ok(slots)
}

/// Full prompt: every context segment in order, then the target text.
pub fn build_prompt(
    encoder: &dyn TextEncoder,
    codec: &dyn AudioCodec,
    context: &[Segment],
    text: &str,
    speaker: u32,
    device: &Device,
) -> Result<TokenStream> {
    let mut stream = TokenStream::new(codec.num_codebooks());
    for segment in context {
        stream.extend(tokenize_segment(encoder, codec, segment, device)?)?;
    }
    stream.extend(tokenize_text_segment(encoder, text, speaker)?)?;

    tracing::debug!(
        context_segments = context.len(),
        prompt_frames = stream.len(),
        "built prompt"
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{create_mock_tokenizer, TextTokenizer};
    use candle_core::{DType, Tensor};

    /// One frame of codes per `hop` samples (rounded up); code = frame index + 1.
    struct HopCodec {
        hop: usize,
        k: usize,
    }

    impl AudioCodec for HopCodec {
        fn num_codebooks(&self) -> usize {
            self.k
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn encode(&self, waveform: &Tensor) -> Result<Tensor> {
            let n = waveform.dim(2)?;
            let frames = n.div_ceil(self.hop);
            let data: Vec<i64> = (0..self.k)
                .flat_map(|_| (0..frames).map(|f| f as i64 + 1))
                .collect();
            Ok(Tensor::from_vec(data, (1, self.k, frames), waveform.device())?)
        }

        fn decode(&self, codes: &Tensor) -> Result<Tensor> {
            let t = codes.dim(2)?;
            Ok(Tensor::zeros((1, 1, t * self.hop), DType::F32, codes.device())?)
        }
    }

    fn tokenizer() -> TextTokenizer {
        TextTokenizer::from_tokenizer(create_mock_tokenizer()).unwrap()
    }

    #[test]
    fn test_text_segment_one_frame_per_subword() {
        let slots = tokenize_text_segment(&tokenizer(), "Hi", 0).unwrap();
        assert_eq!(
            slots,
            [0, 2, 4, 3, 6, 7, 1].map(FrameSlot::Text).to_vec()
        );
    }

    #[test]
    fn test_audio_frames_plus_end_of_segment() {
        let codec = HopCodec { hop: 1920, k: 3 };
        let audio = AudioBuffer::new(vec![0.0; 1920 * 2 + 5], 24_000);
        let slots = tokenize_audio(&codec, &audio, &Device::Cpu).unwrap();
        assert_eq!(slots.len(), 3 + 1);
        assert_eq!(slots[0], FrameSlot::Audio(vec![1, 1, 1]));
        assert_eq!(slots[3], FrameSlot::end_of_segment(3));
    }

    #[test]
    fn test_audio_rate_mismatch() {
        let codec = HopCodec { hop: 1920, k: 3 };
        let audio = AudioBuffer::new(vec![0.0; 100], 16_000);
        let err = tokenize_audio(&codec, &audio, &Device::Cpu).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::SampleRateMismatch {
                expected: 24_000,
                actual: 16_000
            })
        );
    }

    #[test]
    fn test_segment_frame_count() {
        let codec = HopCodec { hop: 1920, k: 4 };
        // 7 subwords, ceil(5000 / 1920) = 3 audio frames, 1 end frame
        let segment = Segment::new(1, "Hi", AudioBuffer::new(vec![0.1; 5000], 24_000));
        let slots = tokenize_segment(&tokenizer(), &codec, &segment, &Device::Cpu).unwrap();
        assert_eq!(slots.len(), 7 + 3 + 1);
        assert!(slots[..7].iter().all(FrameSlot::is_text));
        assert!(slots[7..].iter().all(FrameSlot::is_audio));
    }

    #[test]
    fn test_prompt_order() {
        let codec = HopCodec { hop: 1920, k: 2 };
        let tok = tokenizer();
        let context = vec![
            Segment::new(0, "Hi", AudioBuffer::new(vec![0.0; 1920], 24_000)),
            Segment::new(1, "Hi", AudioBuffer::new(vec![0.0; 1920], 24_000)),
        ];
        let prompt = build_prompt(&tok, &codec, &context, "Hi", 0, &Device::Cpu).unwrap();
        // (7 + 1 + 1) per context segment, then 7 target text frames
        assert_eq!(prompt.len(), 9 + 9 + 7);
        assert_eq!(prompt.num_codebooks(), 2);
        let frames = prompt.frames();
        assert!(frames[18..].iter().all(FrameSlot::is_text));
        assert_eq!(frames[8], FrameSlot::end_of_segment(2));
        // speaker tag of the second segment
        assert_eq!(frames[11], FrameSlot::Text(5));
    }

    #[test]
    fn test_prompt_without_context_is_text_only() {
        let codec = HopCodec { hop: 1920, k: 2 };
        let prompt = build_prompt(&tokenizer(), &codec, &[], "Hi", 1, &Device::Cpu).unwrap();
        assert_eq!(prompt.len(), 7);
        assert!(prompt.frames().iter().all(FrameSlot::is_text));
    }

    #[test]
    fn test_segment_accessors() {
        let segment = Segment::new(3, "hello", AudioBuffer::empty(24_000));
        assert_eq!(segment.speaker(), 3);
        assert_eq!(segment.text(), "hello");
        assert!(segment.audio().is_empty());
    }
}
