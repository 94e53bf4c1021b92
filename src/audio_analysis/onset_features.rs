/*
MIT License

Copyright (c) 2024 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Per-onset envelope shape and brightness.
//!
//! For every onset, the envelope is inspected from the onset up to the next
//! onset, but never longer than [`AnalysisConfig::max_window_s`]:
//!
//! ```text
//!          peak
//!           /\
//!          /  \__
//!         /      \___ <- 50 % of peak
//!   _____/           \______
//!        ^   ^        ^
//!    onset   attack   release
//! ```
//!
//! A short attack together with a short release gives a "percussive" onset
//! with a velocity close to `1.0`, a slow swell and long sustain gives a
//! velocity close to `0.0`.

use crate::audio_preprocessing::envelope::EnvelopeAnalysis;
use crate::config::AnalysisConfig;

/// Features of a single onset.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OnsetRecord {
    /// Sample index of the onset.
    pub onset_sample: usize,
    /// Seconds from the onset to the envelope peak.
    pub attack_time: f64,
    /// Seconds from the envelope peak until the envelope falls below the
    /// release threshold.
    pub release_time: f64,
    /// Percussiveness in `0.0..=1.0`. `1.0` means fast attack and release.
    pub velocity_value: f64,
    /// Mean spectral centroid (Hz) over the analysis window.
    pub spectral_mean_freq: f64,
}

impl OnsetRecord {
    /// Record of an onset whose envelope shape can't be measured.
    const fn degenerate(onset_sample: usize, spectral_mean_freq: f64) -> Self {
        Self {
            onset_sample,
            attack_time: 0.0,
            release_time: 0.0,
            velocity_value: 0.0,
            spectral_mean_freq,
        }
    }
}

/// Computes one [`OnsetRecord`] per onset.
#[derive(Debug, Copy, Clone)]
pub struct OnsetFeatureComputer<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> OnsetFeatureComputer<'a> {
    /// Creates a new computer. The config must be valid.
    #[must_use]
    pub const fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Computes the features of all onsets. The result has the same length
    /// and order as `onset_samples`.
    ///
    /// `onset_samples` must be ascending and not exceed the envelope length,
    /// and `sample_rate` must be positive. Duplicate onsets result in a zero
    /// record for all but the last of them.
    #[must_use]
    pub fn compute(
        &self,
        analysis: &EnvelopeAnalysis,
        sample_rate: u32,
        onset_samples: &[usize],
    ) -> Vec<OnsetRecord> {
        let envelope = analysis.envelope.as_slice();
        let max_window = (self.config.max_window_s * f64::from(sample_rate)) as usize;

        onset_samples
            .iter()
            .enumerate()
            .map(|(i, &onset)| {
                let limit = onset_samples
                    .get(i + 1)
                    .copied()
                    .unwrap_or(envelope.len())
                    .min(envelope.len());
                let window_end = onset.saturating_add(max_window).min(limit);

                if window_end <= onset {
                    return OnsetRecord::degenerate(onset, 0.0);
                }

                let spectral_mean_freq = self.spectral_mean(analysis, onset, window_end);
                self.measure(&envelope[onset..window_end], sample_rate)
                    .map_or_else(
                        || OnsetRecord::degenerate(onset, spectral_mean_freq),
                        |(attack_time, release_time)| OnsetRecord {
                            onset_sample: onset,
                            attack_time,
                            release_time,
                            velocity_value: self.velocity(attack_time, release_time),
                            spectral_mean_freq,
                        },
                    )
            })
            .collect()
    }

    /// Returns attack and release time of the envelope window, or `None` if
    /// the window is too short or silent.
    fn measure(&self, window: &[f64], sample_rate: u32) -> Option<(f64, f64)> {
        if window.len() < 2 {
            return None;
        }

        // First maximum wins.
        let (peak_index, peak) = window
            .iter()
            .copied()
            .enumerate()
            .fold((0, window[0]), |(max_i, max), (i, value)| {
                if value > max {
                    (i, value)
                } else {
                    (max_i, max)
                }
            });
        if peak <= 0.0 {
            return None;
        }

        let threshold = peak * self.config.release_threshold_ratio;
        let release_samples = window[peak_index..]
            .iter()
            .position(|&value| value < threshold)
            .unwrap_or(window.len() - peak_index);

        let sample_rate = f64::from(sample_rate);
        Some((
            peak_index as f64 / sample_rate,
            release_samples as f64 / sample_rate,
        ))
    }

    /// Blends attack and release time into the velocity value.
    #[must_use]
    pub fn velocity(&self, attack_time: f64, release_time: f64) -> f64 {
        let attack = (attack_time / self.config.attack_reference_s).clamp(0.0, 1.0);
        let release = (release_time / self.config.release_reference_s).clamp(0.0, 1.0);
        let slowness = self.config.attack_weight * attack + self.config.release_weight * release;
        (1.0 - slowness).clamp(0.0, 1.0)
    }

    /// Mean spectral centroid of the hop frames spanned by the window. At
    /// least one frame is inspected.
    fn spectral_mean(&self, analysis: &EnvelopeAnalysis, start: usize, end: usize) -> f64 {
        let hop = self.config.hop_size.max(1);
        let frames = analysis.spectral_curve.len();
        let first = (start / hop).min(frames.saturating_sub(1));
        let last = (end / hop).min(frames).max(first + 1);
        analysis.spectral_curve.mean_centroid(first..last)
    }
}
