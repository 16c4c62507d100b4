//! Audio preparation before streaming: channel downmix, rate conversion and
//! quantization to the device's ADC domain

use crate::sample::{quantize, Sample};
use crate::DEVICE_SAMPLE_RATE;

/// Average interleaved frames down to one channel
///
/// # Arguments
/// * `interleaved` - Samples ordered frame by frame ([L, R, L, R, ...] for stereo)
/// * `channels` - Channel count; 0 and 1 both return the input unchanged
///
/// A trailing partial frame is averaged over the channels present.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation rate conversion
///
/// Output length is `floor(len * to_rate / from_rate)`, matching the length a
/// frequency-domain resampler would produce for the same input.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let left = pos.floor() as usize;
            let frac = (pos - left as f64) as f32;
            match samples.get(left + 1) {
                Some(&right) => samples[left] * (1.0 - frac) + right * frac,
                None => samples[samples.len() - 1],
            }
        })
        .collect()
}

/// Downmix, convert to the device rate and quantize to ADC samples
pub fn prepare(interleaved: &[f32], channels: usize, sample_rate: u32) -> Vec<Sample> {
    let mono = downmix(interleaved, channels);
    let resampled = resample_linear(&mono, sample_rate, DEVICE_SAMPLE_RATE);
    quantize(&resampled)
}
