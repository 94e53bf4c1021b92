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

//! Maps onsets onto a beat grid and merges onsets of the same beat cell.
//!
//! Each onset gets a (fractional) beat position relative to the first beat.
//! Onsets rounding to the same beat index form a group that shares one
//! velocity, the mean of its members. Without a beat grid, every onset is a
//! group of its own.

use crate::audio_analysis::causal_mean;
use crate::audio_analysis::onset_features::OnsetRecord;
use crate::config::AnalysisConfig;
use std::collections::BTreeMap;

/// Beat timestamps (seconds) of a track, as delivered by a beat tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeatGrid {
    beat_times: Vec<f64>,
}

impl BeatGrid {
    /// Creates a grid from ascending beat times in seconds.
    #[must_use]
    pub fn from_times(beat_times: Vec<f64>) -> Self {
        Self { beat_times }
    }

    /// Creates a grid from ascending beat sample positions.
    #[must_use]
    pub fn from_samples(beat_samples: &[usize], sample_rate: u32) -> Self {
        let sample_rate = f64::from(sample_rate);
        Self::from_times(
            beat_samples
                .iter()
                .map(|&sample| sample as f64 / sample_rate)
                .collect(),
        )
    }

    /// Number of beats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beat_times.len()
    }

    /// Whether there are no beats at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beat_times.is_empty()
    }

    /// The beat times in seconds.
    #[must_use]
    pub fn beat_times(&self) -> &[f64] {
        &self.beat_times
    }

    /// Median of the gaps between consecutive beats. With a single beat,
    /// `fallback` is returned. `None` for an empty grid.
    #[must_use]
    pub fn period(&self, fallback: f64) -> Option<f64> {
        match self.beat_times.len() {
            0 => None,
            1 => Some(fallback),
            _ => {
                let mut gaps = self
                    .beat_times
                    .windows(2)
                    .map(|pair| pair[1] - pair[0])
                    .collect::<Vec<_>>();
                gaps.sort_by(f64::total_cmp);
                let middle = gaps.len() / 2;
                Some(if gaps.len() % 2 == 0 {
                    (gaps[middle - 1] + gaps[middle]) / 2.0
                } else {
                    gaps[middle]
                })
            }
        }
    }
}

/// An [`OnsetRecord`] with its place on the beat grid.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct AlignedOnset {
    /// Features of the onset as measured on the envelope.
    pub record: OnsetRecord,
    /// Onset time in seconds.
    pub onset_time: f64,
    /// Nearest beat, relative to the first beat. Negative before the first
    /// beat.
    pub beat_index: i64,
    /// Beats since the first beat. Without a beat grid, this is the onset
    /// time in seconds.
    pub beat_position: f64,
    /// `beat_position - beat_index`, in `-0.5..=0.5`.
    pub beat_fraction: f64,
    /// Mean velocity of all onsets with the same beat index.
    pub group_velocity: f64,
    /// Causal moving average of the spectral mean frequency.
    pub spectral_mean_freq_smoothed: f64,
}

/// Aligns [`OnsetRecord`]s to a [`BeatGrid`].
#[derive(Debug, Copy, Clone)]
pub struct BeatAligner<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> BeatAligner<'a> {
    /// Creates a new aligner. The config must be valid.
    #[must_use]
    pub const fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Aligns all records. The output is sorted by onset time and has the
    /// same length as `records`.
    #[must_use]
    pub fn align(
        &self,
        records: &[OnsetRecord],
        sample_rate: u32,
        grid: &BeatGrid,
    ) -> Vec<AlignedOnset> {
        let sample_rate = f64::from(sample_rate);
        let positioned = records.iter().map(|record| {
            let onset_time = record.onset_sample as f64 / sample_rate;
            AlignedOnset {
                record: *record,
                onset_time,
                beat_position: onset_time,
                group_velocity: record.velocity_value,
                ..Default::default()
            }
        });

        let period = grid.period(self.config.beat_period_fallback_s);
        let mut aligned = match (grid.beat_times.first(), period) {
            (Some(&first_beat), Some(period)) => {
                log::debug!(
                    "aligning {} onsets to {} beats, period {period:.4}s",
                    records.len(),
                    grid.len()
                );
                Self::group(positioned.map(|onset| Self::place(onset, first_beat, period)))
            }
            _ => {
                log::debug!("no beat grid, {} ungrouped onsets", records.len());
                positioned.collect()
            }
        };

        let spectral = aligned
            .iter()
            .map(|onset| onset.record.spectral_mean_freq)
            .collect::<Vec<_>>();
        let smoothed = causal_mean(&spectral, self.config.spectral_smoothing_window);
        for (onset, smoothed) in aligned.iter_mut().zip(smoothed) {
            onset.spectral_mean_freq_smoothed = smoothed;
        }

        aligned
    }

    fn place(onset: AlignedOnset, first_beat: f64, period: f64) -> AlignedOnset {
        let beat_position = if period > 0.0 {
            (onset.onset_time - first_beat) / period
        } else {
            0.0
        };
        let beat_index = beat_position.round();
        AlignedOnset {
            beat_index: beat_index as i64,
            beat_position,
            beat_fraction: beat_position - beat_index,
            ..onset
        }
    }

    /// Groups the onsets by beat index, assigns the mean velocity of each
    /// group, and restores the temporal order.
    fn group(onsets: impl Iterator<Item = AlignedOnset>) -> Vec<AlignedOnset> {
        let mut groups = BTreeMap::<i64, Vec<AlignedOnset>>::new();
        for onset in onsets {
            groups.entry(onset.beat_index).or_default().push(onset);
        }

        let mut grouped = groups
            .into_values()
            .flat_map(|members| {
                let group_velocity = members
                    .iter()
                    .map(|onset| onset.record.velocity_value)
                    .sum::<f64>()
                    / members.len() as f64;
                members.into_iter().map(move |onset| AlignedOnset {
                    group_velocity,
                    ..onset
                })
            })
            .collect::<Vec<_>>();

        grouped.sort_by(|a, b| a.onset_time.total_cmp(&b.onset_time));
        grouped
    }
}
