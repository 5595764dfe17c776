//! Top-k token sampling for frame models
//!
//! The engine never samples itself; it hands every [`FrameModel`] call a
//! [`SamplingParams`] and a per-call [`SamplingContext`]. Implementations use
//! [`sample_topk`] so that a seeded context yields reproducible frames.
//!
//! [`FrameModel`]: super::FrameModel

use anyhow::Result;
use candle_core::{DType, IndexOp, Tensor, D};

/// Deterministic RNG for a single generation call.
///
/// With a seed the same stream of draws is produced every time, which is what
/// makes two `generate` calls with the same inputs and seed bit-identical.
/// Without a seed it falls back to system time.
#[derive(Debug, Clone)]
pub struct SamplingContext {
    /// PCG state (only used when seeded)
    state: u64,
    seeded: bool,
    /// Counter for unseeded fallback
    counter: u64,
}

fn mix_seed(seed: u64) -> u64 {
    seed.wrapping_mul(2685821657736338717)
        .wrapping_add(1442695040888963407)
}

impl SamplingContext {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self {
                state: mix_seed(s),
                seeded: true,
                counter: 0,
            },
            None => Self {
                state: 0,
                seeded: false,
                counter: 0,
            },
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Uniform f32 in [0, 1).
    pub fn rand_f32(&mut self) -> f32 {
        if !self.seeded {
            use std::time::{SystemTime, UNIX_EPOCH};

            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            let count = self.counter;
            self.counter += 1;

            let state = seed
                .wrapping_add(count)
                .wrapping_mul(1103515245)
                .wrapping_add(12345);
            return unit_f32((state >> 32) as u32);
        }

        // PCG XSH RR 64/32
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        let output = xorshifted.rotate_right(rot);

        unit_f32(output)
    }
}

/// Top 24 bits as a multiple of 2^-24, so the result is strictly below 1.0.
fn unit_f32(bits: u32) -> f32 {
    (bits >> 8) as f32 / (1u32 << 24) as f32
}

/// Sampling knobs forwarded to the model on every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Softmax temperature; values below 0.01 fall back to argmax.
    pub temperature: f32,
    /// Number of highest-scoring candidates kept (0 = no filtering).
    pub top_k: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            top_k: 50,
        }
    }
}

/// Temperature-scaled top-k sampling.
///
/// `logits` is `[batch, vocab]`; returns `[batch]` U32 token ids.
pub fn sample_topk(
    logits: &Tensor,
    params: &SamplingParams,
    ctx: &mut SamplingContext,
) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;

    if params.temperature < 0.01 {
        return greedy_sample(&logits);
    }

    let logits = if params.temperature != 1.0 {
        (logits / params.temperature as f64)?
    } else {
        logits
    };

    let logits = if params.top_k > 0 {
        top_k_filter(&logits, params.top_k)?
    } else {
        logits
    };

    let probs = candle_nn::ops::softmax_last_dim(&logits)?;
    multinomial_sample(&probs, ctx)
}

/// Keep only the top k logits, set the rest to -inf.
///
/// Dispatches between a CPU-native sort and an on-device sort.
fn top_k_filter(logits: &Tensor, k: usize) -> Result<Tensor> {
    #[cfg(feature = "profiling")]
    let _span = tracing::info_span!("top_k").entered();
    let (batch, vocab) = logits.dims2()?;
    let k = k.min(vocab);
    if k == 0 {
        return Ok(logits.clone());
    }

    if logits.device().is_cpu() {
        let mut result_data = Vec::with_capacity(batch * vocab);
        for b in 0..batch {
            let row: Vec<f32> = logits.i(b)?.to_vec1()?;
            let mut sorted = row.clone();
            sorted.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            let threshold = sorted[k - 1];
            result_data.extend(
                row.iter()
                    .map(|&v| if v >= threshold { v } else { f32::NEG_INFINITY }),
            );
        }
        Ok(Tensor::new(result_data.as_slice(), logits.device())?.reshape((batch, vocab))?)
    } else {
        let (sorted, _) = logits.sort_last_dim(false)?;
        let threshold = sorted.narrow(1, k - 1, 1)?;
        let mask = logits.ge(&threshold.broadcast_as(logits.shape())?)?;
        let neg_inf =
            Tensor::new(&[f32::NEG_INFINITY], logits.device())?.broadcast_as(logits.shape())?;
        Ok(mask.where_cond(logits, &neg_inf)?)
    }
}

/// Inverse-CDF draw from each row of `probs`.
fn multinomial_sample(probs: &Tensor, ctx: &mut SamplingContext) -> Result<Tensor> {
    let batch = probs.dim(0)?;
    let uniform: Vec<f32> = (0..batch).map(|_| ctx.rand_f32()).collect();
    inverse_cdf(probs, &uniform)
}

/// First index per row whose CDF exceeds `uniform[b] * row_total`.
///
/// Scaling by the row total keeps the draw inside the CDF when softmax
/// rounding leaves it short of 1.0, and the strict comparison skips
/// zero-probability entries, so the result always has nonzero mass.
fn inverse_cdf(probs: &Tensor, uniform: &[f32]) -> Result<Tensor> {
    let (_, vocab) = probs.dims2()?;

    let cumsum = probs.cumsum(1)?;
    let total = cumsum.narrow(1, vocab - 1, 1)?;
    let uniform = Tensor::new(uniform, probs.device())?.unsqueeze(1)?;
    let threshold = uniform.broadcast_mul(&total)?;

    let mask = cumsum.gt(&threshold.broadcast_as(cumsum.shape())?)?;

    // argmin over (position where crossed, vocab + 1 elsewhere).
    let positions: Vec<f32> = (0..vocab).map(|i| i as f32 + 1.0).collect();
    let positions = Tensor::new(positions.as_slice(), probs.device())?
        .unsqueeze(0)?
        .broadcast_as(mask.shape())?;
    let large = Tensor::new(&[vocab as f32 + 1.0], probs.device())?.broadcast_as(mask.shape())?;
    let masked_positions = mask.where_cond(&positions, &large)?;

    Ok(masked_positions.argmin(D::Minus1)?)
}

/// Greedy sampling (argmax)
pub fn greedy_sample(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.argmax(D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn peaked_logits(device: &Device) -> Tensor {
        Tensor::new(&[[0.0f32, 0.0, 10.0, 0.0, 0.0]], device).unwrap()
    }

    #[test]
    fn test_sampling_params_default() {
        let params = SamplingParams::default();
        assert!((params.temperature - 0.9).abs() < 1e-6);
        assert_eq!(params.top_k, 50);
    }

    #[test]
    fn test_greedy_sample() {
        let logits = Tensor::new(&[[1.0f32, 5.0, 2.0], [3.0, 0.0, 1.0]], &Device::Cpu).unwrap();
        let ids: Vec<u32> = greedy_sample(&logits).unwrap().to_vec1().unwrap();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn test_low_temperature_is_greedy() {
        let params = SamplingParams {
            temperature: 0.0,
            top_k: 50,
        };
        let mut ctx = SamplingContext::new(Some(1));
        let ids: Vec<u32> = sample_topk(&peaked_logits(&Device::Cpu), &params, &mut ctx)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_top_k_one_is_argmax() {
        let logits = Tensor::new(&[[0.1f32, 0.3, 0.2]], &Device::Cpu).unwrap();
        let params = SamplingParams {
            temperature: 1.0,
            top_k: 1,
        };
        let mut ctx = SamplingContext::new(Some(7));
        for _ in 0..10 {
            let ids: Vec<u32> = sample_topk(&logits, &params, &mut ctx)
                .unwrap()
                .to_vec1()
                .unwrap();
            assert_eq!(ids, vec![1]);
        }
    }

    #[test]
    fn test_sample_stays_in_top_k() {
        let logits = Tensor::new(&[[5.0f32, 4.9, -3.0, -4.0, -5.0]], &Device::Cpu).unwrap();
        let params = SamplingParams {
            temperature: 1.0,
            top_k: 2,
        };
        let mut ctx = SamplingContext::new(Some(3));
        for _ in 0..50 {
            let ids: Vec<u32> = sample_topk(&logits, &params, &mut ctx)
                .unwrap()
                .to_vec1()
                .unwrap();
            assert!(ids[0] < 2, "sampled {} outside top-k", ids[0]);
        }
    }

    #[test]
    fn test_sample_batch_shape() {
        let logits = Tensor::zeros((4, 16), DType::F32, &Device::Cpu).unwrap();
        let mut ctx = SamplingContext::new(Some(0));
        let ids = sample_topk(&logits, &SamplingParams::default(), &mut ctx).unwrap();
        assert_eq!(ids.dims(), &[4]);
    }

    #[test]
    fn test_rand_f32_range() {
        let mut ctx = SamplingContext::new(Some(42));
        for _ in 0..1000 {
            let v = ctx.rand_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_seeded_deterministic() {
        let mut a = SamplingContext::new(Some(42));
        let mut b = SamplingContext::new(Some(42));
        for _ in 0..100 {
            assert_eq!(a.rand_f32(), b.rand_f32());
        }
    }

    #[test]
    fn test_different_seeds_different_values() {
        let mut a = SamplingContext::new(Some(1));
        let mut b = SamplingContext::new(Some(2));
        let va: Vec<f32> = (0..10).map(|_| a.rand_f32()).collect();
        let vb: Vec<f32> = (0..10).map(|_| b.rand_f32()).collect();
        assert_ne!(va, vb);
    }

    #[test]
    fn test_unit_f32_below_one() {
        assert_eq!(unit_f32(0), 0.0);
        assert!(unit_f32(u32::MAX) < 1.0);
    }

    #[test]
    fn test_inverse_cdf_draw_past_rounded_total() {
        // Row sums to slightly under 1.0; a draw near 1.0 must land on the
        // last token with mass, never wrap to index 0.
        let probs = Tensor::new(&[[0.0f32, 0.5, 0.4999, 0.0]], &Device::Cpu).unwrap();
        let ids: Vec<u32> = inverse_cdf(&probs, &[unit_f32(u32::MAX)])
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_inverse_cdf_zero_draw_skips_empty_tokens() {
        let probs = Tensor::new(&[[0.0f32, 0.0, 1.0, 0.0]], &Device::Cpu).unwrap();
        let ids: Vec<u32> = inverse_cdf(&probs, &[0.0]).unwrap().to_vec1().unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_unseeded_context() {
        let mut ctx = SamplingContext::new(None);
        assert!(!ctx.is_seeded());
        let v = ctx.rand_f32();
        assert!((0.0..1.0).contains(&v));
    }

    #[test]
    fn test_seeded_sampling_reproducible() {
        let logits = Tensor::new(&[[1.0f32, 1.1, 0.9, 1.05, 0.95]], &Device::Cpu).unwrap();
        let params = SamplingParams {
            temperature: 1.0,
            top_k: 5,
        };
        let draw = |seed| {
            let mut ctx = SamplingContext::new(Some(seed));
            (0..20)
                .map(|_| {
                    sample_topk(&logits, &params, &mut ctx)
                        .unwrap()
                        .to_vec1::<u32>()
                        .unwrap()[0]
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }

    #[test]
    fn test_top_k_filter_keeps_top_values() {
        let logits = Tensor::new(&[[1.0f32, 5.0, 3.0, 4.0]], &Device::Cpu).unwrap();
        let filtered: Vec<f32> = top_k_filter(&logits, 2)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(filtered[1], 5.0);
        assert_eq!(filtered[3], 4.0);
        assert!(filtered[0].is_infinite() && filtered[2].is_infinite());
    }

    #[test]
    fn test_top_k_filter_k_larger_than_vocab() {
        let logits = Tensor::new(&[[1.0f32, 2.0]], &Device::Cpu).unwrap();
        let filtered: Vec<f32> = top_k_filter(&logits, 10)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(filtered, vec![1.0, 2.0]);
    }

    #[test]
    fn test_multinomial_one_hot() {
        let probs = Tensor::new(&[[0.0f32, 0.0, 1.0, 0.0]], &Device::Cpu).unwrap();
        let mut ctx = SamplingContext::new(Some(5));
        let ids: Vec<u32> = multinomial_sample(&probs, &mut ctx)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(ids, vec![2]);
    }
}
