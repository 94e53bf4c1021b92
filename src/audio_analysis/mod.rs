//! The audio analysis layer turns envelope and spectral curve into the final
//! per-onset control stream.
//!
//! All code here requires that all data was properly processed and validated
//! by the [preprocessing layer]. The stages are:
//! 1. [`onset_features`]: attack, release, velocity and spectral mean per
//!    onset,
//! 2. [`beat_alignment`]: beat positions and beat-group velocities,
//! 3. [`post_processing`]: smoothing, re-weighting, gap boost and
//!    normalization.
//!
//! [preprocessing layer]: crate::audio_preprocessing

pub mod beat_alignment;
pub mod onset_features;
pub mod post_processing;

/// Causal moving average: element `i` is the mean of `values[i+1-window..=i]`
/// (fewer elements at the start). A window of `0` is treated as `1`.
///
/// The mean is clamped to the range of its window, so a window of equal
/// values yields exactly that value despite rounding.
pub(crate) fn causal_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let slice = &values[(i + 1).saturating_sub(window)..=i];
            let (min, max) = slice
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
                    (min.min(v), max.max(v))
                });
            let mean = slice.iter().sum::<f64>() / slice.len() as f64;
            if min <= max {
                mean.clamp(min, max)
            } else {
                mean
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causal_mean_works() {
        check!(causal_mean(&[], 3).is_empty());
        check!(causal_mean(&[1.0, 2.0, 3.0, 4.0], 1) == vec![1.0, 2.0, 3.0, 4.0]);
        check!(causal_mean(&[1.0, 3.0, 5.0, 7.0], 2) == vec![1.0, 2.0, 4.0, 6.0]);
        check!(causal_mean(&[3.0, 3.0, 6.0], 10) == vec![3.0, 3.0, 4.0]);
        check!(causal_mean(&[0.1; 7], 5) == vec![0.1; 7]);
        check!(causal_mean(&[2.0, 4.0], 0) == vec![2.0, 4.0]);
    }
}
