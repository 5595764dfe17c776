//! Audio buffers, WAV I/O and resampling

mod io;
pub mod resample;

pub use io::{downmix_to_mono, load_wav, save_wav, AudioBuffer};
pub use resample::{resample, Resample, ResampleQuality, Resampler};
