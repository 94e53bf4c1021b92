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

//! Series-level shaping of the aligned onsets into the final control stream.

use crate::audio_analysis::beat_alignment::AlignedOnset;
use crate::audio_analysis::causal_mean;
use crate::config::AnalysisConfig;

/// Final per-onset arrays, all of the same length and index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSeries {
    /// Onset times in seconds, non-decreasing.
    pub onset_times: Vec<f64>,
    /// Beat positions, or onset times without a beat grid.
    pub beat_positions: Vec<f64>,
    /// Smoothed and re-weighted group velocity in `0.0..=1.0`, boosted
    /// before pauses.
    pub onset_strength: Vec<f64>,
    /// Normalized smoothed spectral centroid in `0.0..=1.0`.
    pub onset_contrast: Vec<f64>,
    /// Normalized release time in `0.0..=1.0`.
    pub onset_spread: Vec<f64>,
}

impl OutputSeries {
    /// Number of onsets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.onset_times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.onset_times.is_empty()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for OutputSeries {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("OutputSeries", 6)?;
        state.serialize_field("num_onsets", &self.len())?;
        state.serialize_field("onset_times", &self.onset_times)?;
        state.serialize_field("beat_positions", &self.beat_positions)?;
        state.serialize_field("onset_strength", &self.onset_strength)?;
        state.serialize_field("onset_contrast", &self.onset_contrast)?;
        state.serialize_field("onset_spread", &self.onset_spread)?;
        state.end()
    }
}

/// Turns [`AlignedOnset`]s into an [`OutputSeries`].
#[derive(Debug, Copy, Clone)]
pub struct SeriesPostProcessor<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> SeriesPostProcessor<'a> {
    /// Creates a new post-processor. The config must be valid.
    #[must_use]
    pub const fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Produces the output series. `onsets` must be sorted by onset time.
    #[must_use]
    pub fn process(&self, onsets: &[AlignedOnset]) -> OutputSeries {
        let onset_times = onsets.iter().map(|o| o.onset_time).collect::<Vec<_>>();
        let beat_positions = onsets.iter().map(|o| o.beat_position).collect::<Vec<_>>();

        let mut onset_strength = self.reweighted_velocity(onsets);
        self.boost_before_pauses(&mut onset_strength, &onset_times, &beat_positions);

        let onset_contrast = min_max_normalize(
            &onsets
                .iter()
                .map(|o| o.spectral_mean_freq_smoothed)
                .collect::<Vec<_>>(),
        );
        let onset_spread = min_max_normalize(
            &onsets
                .iter()
                .map(|o| o.record.release_time)
                .collect::<Vec<_>>(),
        );

        OutputSeries {
            onset_times,
            beat_positions,
            onset_strength,
            onset_contrast,
            onset_spread,
        }
    }

    /// Causally smoothed group velocity raised to the strength exponent,
    /// i.e., the onset strength before any pause boost.
    #[must_use]
    pub fn reweighted_velocity(&self, onsets: &[AlignedOnset]) -> Vec<f64> {
        let velocities = onsets.iter().map(|o| o.group_velocity).collect::<Vec<_>>();
        causal_mean(&velocities, self.config.velocity_smoothing_window)
            .into_iter()
            .map(|v| v.clamp(0.0, 1.0).powf(self.config.strength_exponent))
            .collect()
    }

    /// Raises the strength of every onset that is followed by a long pause,
    /// either in time or in beats.
    fn boost_before_pauses(&self, strength: &mut [f64], times: &[f64], beats: &[f64]) {
        for i in 0..strength.len().saturating_sub(1) {
            let time_gap = times[i + 1] - times[i];
            let beat_gap = (beats[i + 1] - beats[i]).abs();
            if time_gap > self.config.gap_time_threshold_s
                || beat_gap > self.config.gap_beat_threshold
            {
                log::trace!("pause after onset {i} ({time_gap:.3}s, {beat_gap:.2} beats)");
                strength[i] = (strength[i] + self.config.gap_boost).min(1.0);
            }
        }
    }
}

/// Scales the values to `0.0..=1.0`. If all values are equal, every value
/// becomes `0.5`.
#[must_use]
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    if max > min {
        values.iter().map(|v| (v - min) / (max - min)).collect()
    } else {
        vec![0.5; values.len()]
    }
}
