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

//! Wires all stages together: envelope extraction, per-onset features, beat
//! alignment, and post-processing.

use crate::audio_analysis::beat_alignment::{AlignedOnset, BeatAligner, BeatGrid};
use crate::audio_analysis::onset_features::OnsetFeatureComputer;
use crate::audio_analysis::post_processing::{OutputSeries, SeriesPostProcessor};
use crate::audio_preprocessing::envelope::EnvelopeExtractor;
use crate::audio_preprocessing::filters::{FilterDesignError, SignalFilters};
use crate::audio_preprocessing::spectral::SpectralStrategy;
use crate::config::{AnalysisConfig, InvalidConfigError};
use std::sync::Arc;
use thiserror::Error;

/// Possible errors of [`OnsetAnalyzer`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] InvalidConfigError),
    #[error("filter design failed: {0}")]
    FilterDesign(#[from] FilterDesignError),
    /// The onset at `index` is before its predecessor.
    #[error("onset samples must be ascending, but onset {index} is not")]
    NonAscendingOnsets { index: usize },
    /// The onset at `index` lies behind the end of the signal.
    #[error("onset {index} at sample {sample} is beyond the signal of {len} samples")]
    OnsetOutOfRange {
        index: usize,
        sample: usize,
        len: usize,
    },
    /// The beat at `index` is before its predecessor.
    #[error("beat samples must be ascending, but beat {index} is not")]
    NonAscendingBeats { index: usize },
}

/// Borrowed input of a single analysis.
#[derive(Debug, Copy, Clone)]
pub struct AnalysisInput<'a> {
    /// Mono signal.
    pub signal: &'a [f32],
    pub sample_rate: u32,
    /// Ascending onset sample positions.
    pub onset_samples: &'a [usize],
    /// Ascending beat sample positions; may be empty.
    pub beat_samples: &'a [usize],
}

impl AnalysisInput<'_> {
    /// Fails fast on input the pipeline can't give a meaningful answer for.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.sample_rate == 0 {
            return Err(FilterDesignError::InvalidSampleRate(self.sample_rate).into());
        }
        if let Some(index) = first_descending(self.onset_samples) {
            return Err(AnalysisError::NonAscendingOnsets { index });
        }
        if let Some((index, &sample)) = self
            .onset_samples
            .iter()
            .enumerate()
            .find(|(_, sample)| **sample > self.signal.len())
        {
            return Err(AnalysisError::OnsetOutOfRange {
                index,
                sample,
                len: self.signal.len(),
            });
        }
        if let Some(index) = first_descending(self.beat_samples) {
            return Err(AnalysisError::NonAscendingBeats { index });
        }
        Ok(())
    }
}

/// Index of the first element smaller than its predecessor.
fn first_descending(values: &[usize]) -> Option<usize> {
    values
        .windows(2)
        .position(|pair| pair[1] < pair[0])
        .map(|i| i + 1)
}

/// Runs the full onset analysis. One analyzer can be shared by many threads;
/// its filter cache is the only shared state.
#[derive(Debug)]
pub struct OnsetAnalyzer {
    config: AnalysisConfig,
    filters: Arc<SignalFilters>,
    spectral: Box<dyn SpectralStrategy>,
}

impl OnsetAnalyzer {
    /// Creates a new analyzer after validating the config.
    pub fn new(config: AnalysisConfig) -> Result<Self, InvalidConfigError> {
        config.validate()?;
        let filters = Arc::new(SignalFilters::from_config(&config));
        let spectral = config.spectral_backend.strategy(&config);
        Ok(Self {
            config,
            filters,
            spectral,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The memoized filters of this analyzer.
    #[must_use]
    pub fn filters(&self) -> &Arc<SignalFilters> {
        &self.filters
    }

    /// Analyzes one signal and produces the output series.
    pub fn analyze(&self, input: &AnalysisInput) -> Result<OutputSeries, AnalysisError> {
        let aligned = self.align(input)?;
        Ok(SeriesPostProcessor::new(&self.config).process(&aligned))
    }

    /// Analyzes one signal up to the beat alignment. Useful to inspect the
    /// per-onset features and groups.
    pub fn align(&self, input: &AnalysisInput) -> Result<Vec<AlignedOnset>, AnalysisError> {
        input.validate()?;
        log::debug!(
            "analyzing {} samples @ {} Hz, {} onsets, {} beats",
            input.signal.len(),
            input.sample_rate,
            input.onset_samples.len(),
            input.beat_samples.len()
        );

        let envelope = EnvelopeExtractor::new(&self.filters, self.spectral.as_ref())
            .extract(input.signal, input.sample_rate)?;
        if envelope.is_empty() {
            log::debug!("empty signal, nothing to analyze");
        }

        let records = OnsetFeatureComputer::new(&self.config).compute(
            &envelope,
            input.sample_rate,
            input.onset_samples,
        );
        let grid = BeatGrid::from_samples(input.beat_samples, input.sample_rate);
        Ok(BeatAligner::new(&self.config).align(&records, input.sample_rate, &grid))
    }
}
