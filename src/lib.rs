//! onset-features extracts percussive and timbral descriptors for the onsets
//! of an audio signal and aligns them to a beat grid. The result is a compact
//! per-onset control stream, e.g., to drive a synthesizer or a visualization.
//!
//! The input is a mono signal, its sample rate, the onset sample positions
//! and (optionally) the beat sample positions, as delivered by any onset and
//! beat detector. Detection itself is not part of this crate.
//!
//! # Architecture
//!
//! The crate is split into two layers:
//! - [`audio_preprocessing`]: band-pass filtering, amplitude envelope, and the
//!   spectral-centroid curve of the signal,
//! - [`audio_analysis`]: attack, release, and velocity per onset, beat
//!   grouping, and shaping of the final [`OutputSeries`].
//!
//! [`OnsetAnalyzer`] wires both layers together, [`batch`] runs many files in
//! parallel.
//!
//! # Example
//!
//! ```rust
//! use onset_features::{AnalysisConfig, AnalysisInput, OnsetAnalyzer};
//!
//! let analyzer = OnsetAnalyzer::new(AnalysisConfig::default()).unwrap();
//! let signal = vec![0.0_f32; 44100];
//! let series = analyzer
//!     .analyze(&AnalysisInput {
//!         signal: &signal,
//!         sample_rate: 44100,
//!         onset_samples: &[0, 22050],
//!         beat_samples: &[],
//!     })
//!     .unwrap();
//! assert_eq!(series.len(), 2);
//! ```

#[cfg(test)]
#[macro_use]
extern crate assert2;
#[cfg(test)]
#[macro_use]
extern crate float_cmp;

pub mod audio_analysis;
pub mod audio_preprocessing;
pub mod batch;
pub mod config;
pub mod pipeline;

#[cfg(test)]
mod test_utils;

pub use audio_analysis::beat_alignment::{AlignedOnset, BeatAligner, BeatGrid};
pub use audio_analysis::onset_features::{OnsetFeatureComputer, OnsetRecord};
pub use audio_analysis::post_processing::{OutputSeries, SeriesPostProcessor};
pub use audio_preprocessing::envelope::{EnvelopeAnalysis, EnvelopeExtractor};
pub use audio_preprocessing::filters::{FilterDesignError, FilterSpec, SignalFilters};
pub use audio_preprocessing::spectral::{SpectralCurve, SpectralStrategy};
pub use batch::{run_batch, AnalysisJob, BatchOutcome, BatchSummary};
pub use config::{AnalysisConfig, InvalidConfigError, SpectralBackend};
pub use pipeline::{AnalysisError, AnalysisInput, OnsetAnalyzer};

#[cfg(test)]
mod tests {
    use super::*;

    /// Ensures that the pipeline runs with the default config on a typical
    /// input and that a second run gives the same result.
    #[test]
    fn default_pipeline_is_deterministic() {
        let (signal, onsets) = test_utils::bursts_at(44100, 3.0, &[0.1, 0.6, 1.1, 2.5]);
        let beats = [4410, 26460, 48510, 70560, 92610, 114660];
        let input = AnalysisInput {
            signal: &signal,
            sample_rate: 44100,
            onset_samples: &onsets,
            beat_samples: &beats,
        };
        let analyzer = OnsetAnalyzer::new(AnalysisConfig::default()).unwrap();
        let first = analyzer.analyze(&input).unwrap();
        let second = analyzer.analyze(&input).unwrap();
        check!(first.len() == 4);
        check!(first == second);
    }
}
