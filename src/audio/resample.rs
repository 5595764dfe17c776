//! Sample-rate conversion using rubato
//!
//! Used on two paths: bringing reference audio to the engine's working rate,
//! and the round trip through the watermark embedding rate.

use anyhow::{Context, Result};
use rubato::{
    audioadapter::Adapter, Async, FixedAsync, PolynomialDegree, Resampler as RubatoResampler,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

const CHUNK_SIZE: usize = 1024;

/// Sample-rate converter capability.
///
/// Output length is `ceil(len * to / from)` and sample `i` of the output
/// lines up with time `i / to` of the input. Equal rates return the input
/// unchanged.
pub trait Resample: Send + Sync {
    fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer>;
}

/// Resampling quality preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation
    Fast,
    /// Sinc interpolation, 128 taps
    #[default]
    Normal,
    /// Sinc interpolation, 256 taps
    High,
}

/// rubato-backed [`Resample`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resampler {
    quality: ResampleQuality,
}

impl Resampler {
    pub fn new(quality: ResampleQuality) -> Self {
        Self { quality }
    }

    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    fn convert(&self, samples: &[f32], ratio: f64, expected: usize) -> Result<Vec<f32>> {
        match self.quality {
            ResampleQuality::Fast => {
                let mut resampler = Async::<f32>::new_poly(
                    ratio,
                    1.0,
                    PolynomialDegree::Cubic,
                    CHUNK_SIZE,
                    1,
                    FixedAsync::Input,
                )
                .context("Failed to create polynomial resampler")?;
                process_chunks(&mut resampler, samples, expected)
            }
            ResampleQuality::Normal | ResampleQuality::High => {
                let taps = if self.quality == ResampleQuality::High {
                    256
                } else {
                    128
                };
                let params = SincInterpolationParameters {
                    sinc_len: taps,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: taps,
                    window: WindowFunction::BlackmanHarris2,
                };
                let mut resampler = Async::<f32>::new_sinc(
                    ratio,
                    1.0,
                    &params,
                    CHUNK_SIZE,
                    1,
                    FixedAsync::Input,
                )
                .context("Failed to create sinc resampler")?;
                process_chunks(&mut resampler, samples, expected)
            }
        }
    }
}

impl Resample for Resampler {
    fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
        if audio.sample_rate == target_rate {
            return Ok(audio.clone());
        }
        if audio.sample_rate == 0 || target_rate == 0 {
            anyhow::bail!(
                "Cannot resample between {} Hz and {} Hz",
                audio.sample_rate,
                target_rate
            );
        }

        let ratio = target_rate as f64 / audio.sample_rate as f64;
        let expected = (audio.len() as u64 * target_rate as u64).div_ceil(audio.sample_rate as u64)
            as usize;

        let output = if expected == 0 {
            Vec::new()
        } else {
            self.convert(&audio.samples, ratio, expected)?
        };

        tracing::trace!(
            from = audio.sample_rate,
            to = target_rate,
            samples = output.len(),
            "resampled"
        );
        Ok(AudioBuffer::new(output, target_rate))
    }
}

/// Feed `samples` through `resampler` in fixed-size mono chunks and return
/// exactly `expected` frames aligned with the input.
///
/// The filter delays its output by `output_delay()` frames. Those leading
/// frames are dropped, and trailing zero chunks are fed until the tail of
/// the signal has been flushed out.
fn process_chunks<R: RubatoResampler<f32>>(
    resampler: &mut R,
    samples: &[f32],
    expected: usize,
) -> Result<Vec<f32>> {
    let delay = resampler.output_delay();
    let needed = delay + expected;
    let mut output = Vec::with_capacity(needed + CHUNK_SIZE);

    for chunk in samples.chunks(CHUNK_SIZE) {
        process_chunk(resampler, chunk, &mut output)?;
    }

    let zeros = [0.0f32; CHUNK_SIZE];
    // Each flush chunk yields roughly CHUNK_SIZE * ratio frames.
    let mut flushes = 0;
    while output.len() < needed {
        if flushes > needed + 1 {
            anyhow::bail!(
                "Resampler produced {} of {} frames while flushing",
                output.len(),
                needed
            );
        }
        process_chunk(resampler, &zeros, &mut output)?;
        flushes += 1;
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

fn process_chunk<R: RubatoResampler<f32>>(
    resampler: &mut R,
    chunk: &[f32],
    output: &mut Vec<f32>,
) -> Result<()> {
    use audioadapter_buffers::direct::SequentialSliceOfVecs;

    let mut data = chunk.to_vec();
    data.resize(CHUNK_SIZE, 0.0);

    let input_vecs = vec![data];
    let input = SequentialSliceOfVecs::new(&input_vecs, 1, CHUNK_SIZE)
        .context("Failed to create input adapter")?;

    let result = resampler
        .process(&input, 0, None)
        .context("Resampling failed")?;

    for i in 0..result.frames() {
        output.push(result.read_sample(0, i).unwrap_or(0.0));
    }
    Ok(())
}

/// Resample with the default quality.
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    Resampler::default().resample(audio, target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_resample_quality_default() {
        assert_eq!(Resampler::default().quality(), ResampleQuality::Normal);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let audio = AudioBuffer::new(vec![0.25; 1000], 24000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result, audio);
    }

    #[test]
    fn test_downsample_length() {
        let audio = AudioBuffer::new(vec![0.0; 4800], 48000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
        assert_eq!(result.len(), 2400);
    }

    #[test]
    fn test_upsample_length() {
        let audio = AudioBuffer::new(vec![0.0; 1600], 16000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
        assert_eq!(result.len(), 2400);
    }

    #[test]
    fn test_watermark_rate_round_trip_length() {
        let audio = AudioBuffer::new(vec![0.0; 24000], 24000);
        let up = resample(&audio, 44100).unwrap();
        assert_eq!(up.len(), 44100);
        let down = resample(&up, 24000).unwrap();
        assert_eq!(down.len(), 24000);
    }

    fn impulse(len: usize, at: usize, sample_rate: u32) -> AudioBuffer {
        let mut samples = vec![0.0; len];
        samples[at] = 1.0;
        AudioBuffer::new(samples, sample_rate)
    }

    fn peak_index(audio: &AudioBuffer) -> usize {
        audio
            .samples
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_watermark_rate_round_trip_keeps_alignment() {
        let audio = impulse(4800, 1000, 24000);
        let up = resample(&audio, 44100).unwrap();
        let down = resample(&up, 24000).unwrap();
        assert_eq!(down.len(), 4800);
        let peak = peak_index(&down);
        assert!(peak.abs_diff(1000) <= 1, "impulse moved from 1000 to {peak}");
        assert!(down.samples[peak].abs() > 0.5);
    }

    #[test]
    fn test_upsample_keeps_alignment() {
        let up = resample(&impulse(4800, 1000, 24000), 48000).unwrap();
        assert!(peak_index(&up).abs_diff(2000) <= 1);
    }

    #[test]
    fn test_tail_survives_resampling() {
        // The last chunk is nearly full, so its zero padding is shorter than
        // the filter delay.
        let len = 2 * CHUNK_SIZE - 4;
        let audio = impulse(len, len - 10, 24000);
        let up = resample(&audio, 44100).unwrap();
        let down = resample(&up, 24000).unwrap();
        assert_eq!(down.len(), len);
        let peak = peak_index(&down);
        assert!(peak.abs_diff(len - 10) <= 1, "tail impulse landed at {peak}");
        assert!(down.samples[peak].abs() > 0.5);
    }

    #[test]
    fn test_fast_and_high_quality() {
        let audio = AudioBuffer::new(vec![0.0; 2048], 48000);
        for quality in [ResampleQuality::Fast, ResampleQuality::High] {
            let result = Resampler::new(quality).resample(&audio, 24000).unwrap();
            assert_eq!(result.sample_rate, 24000);
            assert_eq!(result.len(), 1024);
        }
    }

    #[test]
    fn test_resample_preserves_sine_wave() {
        let freq = 100.0;
        let audio = AudioBuffer::new(
            (0..4800)
                .map(|i| (2.0 * PI * freq * i as f32 / 48000.0).sin())
                .collect(),
            48000,
        );

        let result = resample(&audio, 24000).unwrap();

        let max_val = result
            .samples
            .iter()
            .map(|s| s.abs())
            .fold(0.0f32, f32::max);
        assert!(max_val > 0.5);
    }

    #[test]
    fn test_resample_empty_audio() {
        let audio = AudioBuffer::empty(24000);
        let result = resample(&audio, 48000).unwrap();
        assert_eq!(result.sample_rate, 48000);
        assert!(result.is_empty());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let audio = AudioBuffer::new(vec![0.5], 0);
        assert!(resample(&audio, 24000).is_err());
    }

    #[test]
    fn test_trait_object() {
        let resampler: Box<dyn Resample> = Box::new(Resampler::new(ResampleQuality::Fast));
        let audio = AudioBuffer::new(vec![0.5, -0.5], 24000);
        let result = resampler.resample(&audio, 48000).unwrap();
        assert_eq!(result.len(), 4);
    }
}
