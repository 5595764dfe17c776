//! Inaudible watermarking of generated audio.
//!
//! The embedding model itself is external. [`Watermarker`] handles the
//! sample-rate round trip around it and pins the key.

use anyhow::{Context, Result};

use crate::audio::{AudioBuffer, Resample, Resampler};

/// Key embedded into every CSM-1B output.
pub const CSM_1B_GH_WATERMARK: [u32; 5] = [212, 211, 146, 56, 201];

/// Rate the embedding model operates at.
pub const EMBEDDING_SAMPLE_RATE: u32 = 44_100;

/// Watermark embedding capability.
pub trait WatermarkEmbedder: Send + Sync {
    /// Return a watermarked copy of `samples` (mono, at `sample_rate`).
    fn embed(&self, samples: &[f32], sample_rate: u32, key: &[u32]) -> Result<Vec<f32>>;
}

/// Sample rate of watermarked output for an engine running at `sample_rate`.
pub fn watermarked_sample_rate(sample_rate: u32) -> u32 {
    sample_rate.min(EMBEDDING_SAMPLE_RATE)
}

/// Post-processor: resample to 44.1 kHz, embed, resample to
/// `min(44.1 kHz, input rate)`.
pub struct Watermarker {
    embedder: Box<dyn WatermarkEmbedder>,
    resampler: Box<dyn Resample>,
    key: Vec<u32>,
}

impl Watermarker {
    /// Watermarker with the CSM-1B key and the default resampler.
    pub fn new(embedder: Box<dyn WatermarkEmbedder>) -> Self {
        Self::with_resampler(embedder, Box::new(Resampler::default()))
    }

    pub fn with_resampler(embedder: Box<dyn WatermarkEmbedder>, resampler: Box<dyn Resample>) -> Self {
        Self {
            embedder,
            resampler,
            key: CSM_1B_GH_WATERMARK.to_vec(),
        }
    }

    pub fn key(&self) -> &[u32] {
        &self.key
    }

    pub fn apply(&self, audio: &AudioBuffer) -> Result<AudioBuffer> {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("watermark").entered();

        let upsampled = self.resampler.resample(audio, EMBEDDING_SAMPLE_RATE)?;
        let encoded = self
            .embedder
            .embed(&upsampled.samples, EMBEDDING_SAMPLE_RATE, &self.key)
            .context("Watermark embedding failed")?;

        let output_rate = watermarked_sample_rate(audio.sample_rate);
        let out = self
            .resampler
            .resample(&AudioBuffer::new(encoded, EMBEDDING_SAMPLE_RATE), output_rate)?;

        tracing::debug!(
            samples = out.len(),
            sample_rate = out.sample_rate,
            "applied watermark"
        );
        Ok(out)
    }
}

impl std::fmt::Debug for Watermarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermarker").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records what it was asked to embed and adds a constant offset.
    struct RecordingEmbedder {
        calls: Arc<Mutex<Vec<(usize, u32, Vec<u32>)>>>,
    }

    impl WatermarkEmbedder for RecordingEmbedder {
        fn embed(&self, samples: &[f32], sample_rate: u32, key: &[u32]) -> Result<Vec<f32>> {
            self.calls
                .lock()
                .unwrap()
                .push((samples.len(), sample_rate, key.to_vec()));
            Ok(samples.iter().map(|s| s + 0.01).collect())
        }
    }

    struct FailingEmbedder;

    impl WatermarkEmbedder for FailingEmbedder {
        fn embed(&self, _: &[f32], _: u32, _: &[u32]) -> Result<Vec<f32>> {
            anyhow::bail!("embedder offline")
        }
    }

    #[test]
    fn test_output_rate_rule() {
        assert_eq!(watermarked_sample_rate(24_000), 24_000);
        assert_eq!(watermarked_sample_rate(44_100), 44_100);
        assert_eq!(watermarked_sample_rate(48_000), 44_100);
    }

    #[test]
    fn test_apply_round_trip() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let watermarker = Watermarker::new(Box::new(RecordingEmbedder {
            calls: calls.clone(),
        }));
        let audio = AudioBuffer::new(vec![0.0; 2400], 24_000);

        let out = watermarker.apply(&audio).unwrap();
        assert_eq!(out.sample_rate, 24_000);
        assert_eq!(out.len(), 2400);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 4410);
        assert_eq!(calls[0].1, EMBEDDING_SAMPLE_RATE);
        assert_eq!(calls[0].2, CSM_1B_GH_WATERMARK.to_vec());
    }

    #[test]
    fn test_high_rate_input_capped() {
        let watermarker = Watermarker::new(Box::new(RecordingEmbedder {
            calls: Arc::default(),
        }));
        let audio = AudioBuffer::new(vec![0.0; 4800], 48_000);
        let out = watermarker.apply(&audio).unwrap();
        assert_eq!(out.sample_rate, 44_100);
        assert_eq!(out.len(), 4410);
    }

    #[test]
    fn test_embed_failure_propagates() {
        let watermarker = Watermarker::new(Box::new(FailingEmbedder));
        let audio = AudioBuffer::new(vec![0.0; 240], 24_000);
        let err = watermarker.apply(&audio).unwrap_err();
        assert!(format!("{err:#}").contains("embedder offline"));
    }

    #[test]
    fn test_key_is_fixed() {
        let watermarker = Watermarker::new(Box::new(FailingEmbedder));
        assert_eq!(watermarker.key(), &[212, 211, 146, 56, 201]);
    }
}
