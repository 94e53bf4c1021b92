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

//! Amplitude envelope and spectral-centroid curve of a signal.
//!
//! The envelope is obtained like this:
//! ```text
//! signal -> band-pass (50 Hz..8 kHz) -> |x| -> low-pass (15 Hz) -> / max
//! ```
//! The spectral curve is computed from the band-passed signal as well, so
//! that rumble and hiss influence neither of them.

use crate::audio_preprocessing::filters::{FilterDesignError, SignalFilters};
use crate::audio_preprocessing::spectral::{SpectralCurve, SpectralStrategy};

/// Output of [`EnvelopeExtractor::extract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeAnalysis {
    /// Amplitude envelope, one value per input sample, with its peak
    /// normalized to `1.0`. All-zero for silent input.
    pub envelope: Vec<f64>,
    /// Spectral centroid per hop frame.
    pub spectral_curve: SpectralCurve,
}

impl EnvelopeAnalysis {
    /// Whether nothing can be analyzed, i.e., the signal was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelope.is_empty()
    }
}

/// Derives the [`EnvelopeAnalysis`] of a mono signal.
#[derive(Debug)]
pub struct EnvelopeExtractor<'a> {
    filters: &'a SignalFilters,
    spectral: &'a dyn SpectralStrategy,
}

impl<'a> EnvelopeExtractor<'a> {
    /// Creates a new extractor using the (memoized) filters and the given
    /// spectral strategy.
    pub fn new(filters: &'a SignalFilters, spectral: &'a dyn SpectralStrategy) -> Self {
        Self { filters, spectral }
    }

    /// Extracts envelope and spectral curve. The signal is not modified.
    ///
    /// An empty signal results in an empty envelope and an empty curve.
    pub fn extract(
        &self,
        signal: &[f32],
        sample_rate: u32,
    ) -> Result<EnvelopeAnalysis, FilterDesignError> {
        let band_filter = self.filters.band_filter(sample_rate)?;
        let lowpass_filter = self.filters.lowpass_filter(sample_rate)?;

        if signal.is_empty() {
            return Ok(EnvelopeAnalysis::default());
        }

        let band_filtered = band_filter.apply(signal.iter().map(|&sample| f64::from(sample)));
        let mut envelope = lowpass_filter.apply(band_filtered.iter().map(|sample| sample.abs()));
        normalize_peak(&mut envelope);

        let spectral_curve = self.spectral.spectral_curve(&band_filtered, sample_rate)?;

        log::debug!(
            "envelope: {} samples, {} spectral frames ({:?})",
            envelope.len(),
            spectral_curve.len(),
            self.spectral.kind()
        );

        Ok(EnvelopeAnalysis {
            envelope,
            spectral_curve,
        })
    }
}

/// Divides all values by the maximum so that the peak becomes `1.0`. If the
/// maximum is not positive (silence), the values stay untouched.
fn normalize_peak(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 {
        values.iter_mut().for_each(|value| *value /= max);
    }
}
