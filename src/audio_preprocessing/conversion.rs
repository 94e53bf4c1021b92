//! Module for conversion of sample values and channel layouts.

use core::num::NonZeroUsize;

/// Transforms an audio sample in range `i16::MIN..=i16::MAX` to a `f32` in
/// range `-1.0..=1.0`.
#[inline]
#[must_use]
pub fn i16_sample_to_f32(val: i16) -> f32 {
    // If to prevent division result >1.0.
    if val == i16::MIN {
        -1.0
    } else {
        val as f32 / i16::MAX as f32
    }
}

/// Transforms an integer sample with `bits_per_sample` significant bits (as
/// read from 24 or 32 bit PCM) to a `f32` in range `-1.0..=1.0`.
#[inline]
#[must_use]
pub fn int_sample_to_f32(val: i32, bits_per_sample: u16) -> f32 {
    let bits = bits_per_sample.clamp(2, 32);
    let max = ((1_i64 << (bits - 1)) - 1) as f64;
    (val as f64 / max).clamp(-1.0, 1.0) as f32
}

/// Averages interleaved multi-channel frames into one mono sample per frame.
/// A trailing incomplete frame is dropped.
#[must_use]
pub fn interleaved_to_mono(samples: &[f32], channels: NonZeroUsize) -> Vec<f32> {
    let channels = channels.get();
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
