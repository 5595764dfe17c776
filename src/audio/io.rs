//! Audio buffers and WAV I/O.

use anyhow::{Context, Result};
use candle_core::Tensor;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Seek, Write};
use std::path::Path;

/// Mono waveform plus its sample rate.
///
/// This is both the reference-audio input of a context segment and the
/// output of generation. Samples are 32-bit floats in \[-1.0, 1.0\].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono audio samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Zero-length buffer at `sample_rate`.
    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Create from a Candle tensor of any shape; the values are flattened.
    pub fn from_tensor(tensor: Tensor, sample_rate: u32) -> Result<Self> {
        let tensor = tensor.flatten_all()?.to_dtype(candle_core::DType::F32)?;
        let samples: Vec<f32> = tensor.to_vec1()?;
        Ok(Self::new(samples, sample_rate))
    }

    /// `[1, 1, samples]` F32 tensor, the layout codecs expect.
    pub fn to_tensor(&self, device: &candle_core::Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.samples.clone(),
            (1, 1, self.samples.len()),
            device,
        )?)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Save to WAV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Load from WAV file (downmixed to mono)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }

    /// Encode as an in-memory 16-bit PCM WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        write_wav(&mut cursor, &self.samples, self.sample_rate)?;
        Ok(cursor.into_inner())
    }
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Load a WAV file into a mono AudioBuffer at its native sample rate.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    tracing::debug!(
        path = %path.display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        "loaded reference audio"
    );

    Ok(AudioBuffer::new(
        downmix_to_mono(samples, spec.channels as usize),
        spec.sample_rate,
    ))
}

/// Save mono samples to a 16-bit WAV file
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let file = std::io::BufWriter::new(
        std::fs::File::create(path)
            .with_context(|| format!("Failed to create WAV file: {}", path.display()))?,
    );
    write_wav(file, samples, sample_rate)
}

fn write_wav<W: Write + Seek>(writer: W, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::new(writer, spec).context("Failed to start WAV stream")?;
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(scaled)?;
    }
    writer.finalize()?;
    Ok(())
}
