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

//! Time-indexed spectral-centroid curve of a signal.
//!
//! The curve has one value per hop frame. Frame `t` is centred on sample
//! `t * hop`, so the frame of a sample index is simply `index / hop`. Two
//! [`SpectralStrategy`] implementations exist; [`SpectralBackend`] selects
//! one.

use crate::audio_preprocessing::filters::FilterDesignError;
use crate::config::{AnalysisConfig, SpectralBackend};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, Hertz, Type};
use core::fmt::Debug;
use core::ops::Range;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Spectral centroid (Hz) and total magnitude of each hop frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralCurve {
    centroids_hz: Vec<f64>,
    energies: Vec<f64>,
}

impl SpectralCurve {
    /// Creates a curve from `(centroid, magnitude sum)` pairs, one per frame.
    #[must_use]
    pub fn from_frames(frames: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let (centroids_hz, energies) = frames.into_iter().unzip();
        Self {
            centroids_hz,
            energies,
        }
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.centroids_hz.len()
    }

    /// Whether the curve has no frames, i.e., the signal was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids_hz.is_empty()
    }

    /// Centroid of every frame. Frames without any energy have centroid 0.
    #[must_use]
    pub fn centroids(&self) -> &[f64] {
        &self.centroids_hz
    }

    /// Total magnitude of every frame.
    #[must_use]
    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    /// Mean centroid over the given frames. Only frames with non-zero energy
    /// contribute. Returns 0 if no frame contributes or the range is out of
    /// bounds.
    #[must_use]
    pub fn mean_centroid(&self, frames: Range<usize>) -> f64 {
        let end = frames.end.min(self.len());
        let start = frames.start.min(end);

        let (sum, count) = self.centroids_hz[start..end]
            .iter()
            .zip(&self.energies[start..end])
            .filter(|(_, energy)| **energy > 0.0)
            .fold((0.0, 0_usize), |(sum, count), (&centroid, _)| {
                (sum + centroid, count + 1)
            });

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

/// Number of hop frames of a centred analysis over `len` samples.
#[must_use]
pub const fn frame_count(len: usize, hop_size: usize) -> usize {
    if len == 0 {
        0
    } else {
        1 + len / hop_size
    }
}

/// Common abstraction over the ways to compute a [`SpectralCurve`].
pub trait SpectralStrategy: Debug + Send + Sync {
    /// Computes the spectral-centroid curve of the (band-filtered) signal.
    fn spectral_curve(
        &self,
        signal: &[f64],
        sample_rate: u32,
    ) -> Result<SpectralCurve, FilterDesignError>;

    /// Convenient getter to get the [`SpectralBackend`] of a strategy.
    /// This is a 1:1 mapping.
    fn kind(&self) -> SpectralBackend;
}

impl SpectralBackend {
    /// Creates the concrete strategy for this backend.
    #[must_use]
    pub fn strategy(self, config: &AnalysisConfig) -> Box<dyn SpectralStrategy> {
        match self {
            Self::Fft => Box::new(FftSpectrum::new(config.fft_size, config.hop_size)),
            Self::FilterBank => Box::new(FilterBankSpectrum::new(
                config.fft_size,
                config.hop_size,
                config.band_low_hz,
                config.band_high_hz,
            )),
        }
    }
}

/// Magnitude spectrum of centred, Hann-windowed frames via [`rustfft`].
pub struct FftSpectrum {
    fft: Arc<dyn Fft<f64>>,
    fft_size: usize,
    hop_size: usize,
    /// Periodic Hann window (pre-computed).
    window: Vec<f64>,
}

impl FftSpectrum {
    /// Creates a new FFT strategy. `fft_size` must be at least 2 and
    /// `hop_size` at least 1.
    #[must_use]
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        let fft = FftPlanner::<f64>::new().plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|i| {
                0.5 - 0.5 * (2.0 * core::f64::consts::PI * i as f64 / fft_size as f64).cos()
            })
            .collect();
        Self {
            fft,
            fft_size,
            hop_size,
            window,
        }
    }

    /// Fills `buffer` with the windowed frame centred on `center`. Samples
    /// outside of the signal are zero.
    fn load_frame(&self, signal: &[f64], center: usize, buffer: &mut [Complex<f64>]) {
        let half = self.fft_size / 2;
        for (i, (slot, weight)) in buffer.iter_mut().zip(&self.window).enumerate() {
            let value = (center + i)
                .checked_sub(half)
                .and_then(|index| signal.get(index))
                .copied()
                .unwrap_or(0.0);
            *slot = Complex::new(value * weight, 0.0);
        }
    }
}

impl Debug for FftSpectrum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FftSpectrum")
            .field("fft_size", &self.fft_size)
            .field("hop_size", &self.hop_size)
            .finish()
    }
}

impl SpectralStrategy for FftSpectrum {
    fn spectral_curve(
        &self,
        signal: &[f64],
        sample_rate: u32,
    ) -> Result<SpectralCurve, FilterDesignError> {
        let frames = frame_count(signal.len(), self.hop_size);
        let bin_hz = f64::from(sample_rate) / self.fft_size as f64;

        let mut buffer = vec![Complex::new(0.0, 0.0); self.fft_size];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut curve = Vec::with_capacity(frames);

        for frame in 0..frames {
            self.load_frame(signal, frame * self.hop_size, &mut buffer);
            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            // Only the non-negative frequencies of a real-valued signal.
            let (weighted, energy) = buffer[..=self.fft_size / 2].iter().enumerate().fold(
                (0.0, 0.0),
                |(weighted, energy), (bin, value)| {
                    let magnitude = value.norm();
                    (weighted + bin as f64 * bin_hz * magnitude, energy + magnitude)
                },
            );

            let centroid = if energy > 0.0 { weighted / energy } else { 0.0 };
            curve.push((centroid, energy));
        }

        Ok(SpectralCurve::from_frames(curve))
    }

    fn kind(&self) -> SpectralBackend {
        SpectralBackend::Fft
    }
}

/// Number of bands of [`FilterBankSpectrum`].
pub const FILTER_BANK_BANDS: usize = 24;

/// Approximates the spectrum with a bank of log-spaced band-pass biquads.
/// The magnitude of a band in a frame is the mean rectified band output over
/// the frame span.
#[derive(Debug, Clone)]
pub struct FilterBankSpectrum {
    frame_size: usize,
    hop_size: usize,
    low_hz: f64,
    high_hz: f64,
}

impl FilterBankSpectrum {
    /// Creates a new filter-bank strategy covering `low_hz..=high_hz`.
    #[must_use]
    pub fn new(frame_size: usize, hop_size: usize, low_hz: f64, high_hz: f64) -> Self {
        Self {
            frame_size,
            hop_size,
            low_hz,
            high_hz,
        }
    }

    /// Centre frequencies of the bands and the shared Q factor, for the
    /// given sample rate.
    fn bands(&self, sample_rate: u32) -> (Vec<f64>, f64) {
        // Keep the upper band and its skirt below Nyquist.
        let high = self.high_hz.min(f64::from(sample_rate) * 0.45);
        let low = self.low_hz.min(high);
        let ratio = (high / low).powf(1.0 / (FILTER_BANK_BANDS - 1) as f64);
        let centers = (0..FILTER_BANK_BANDS)
            .map(|band| low * ratio.powi(band as i32))
            .collect::<Vec<_>>();

        // Neighbouring bands meet at their -3 dB points.
        let spread = ratio.sqrt() - 1.0 / ratio.sqrt();
        let q = if spread > 0.0 {
            1.0 / spread
        } else {
            core::f64::consts::FRAC_1_SQRT_2
        };
        (centers, q)
    }

    fn band_filter(
        sample_rate: u32,
        center_hz: f64,
        q: f64,
    ) -> Result<DirectForm2Transposed<f64>, FilterDesignError> {
        let to_err = |err: biquad::Errors| FilterDesignError::Biquad(format!("{err:?}"));
        let fs = Hertz::<f64>::from_hz(f64::from(sample_rate)).map_err(to_err)?;
        let f0 = Hertz::<f64>::from_hz(center_hz).map_err(to_err)?;
        let coefficients =
            Coefficients::<f64>::from_params(Type::BandPass, fs, f0, q).map_err(to_err)?;
        Ok(DirectForm2Transposed::<f64>::new(coefficients))
    }
}

impl SpectralStrategy for FilterBankSpectrum {
    fn spectral_curve(
        &self,
        signal: &[f64],
        sample_rate: u32,
    ) -> Result<SpectralCurve, FilterDesignError> {
        if sample_rate == 0 {
            return Err(FilterDesignError::InvalidSampleRate(sample_rate));
        }

        let frames = frame_count(signal.len(), self.hop_size);
        let (centers, q) = self.bands(sample_rate);
        let half = self.frame_size / 2;

        let mut weighted = vec![0.0; frames];
        let mut energies = vec![0.0; frames];

        for &center in &centers {
            let mut filter = Self::band_filter(sample_rate, center, q)?;

            // Prefix sums of the rectified band output.
            let mut prefix = Vec::with_capacity(signal.len() + 1);
            prefix.push(0.0);
            let mut acc = 0.0;
            for &sample in signal {
                acc += filter.run(sample).abs();
                prefix.push(acc);
            }

            for frame in 0..frames {
                let center_index = frame * self.hop_size;
                let from = center_index.saturating_sub(half).min(signal.len());
                let to = (center_index + half).min(signal.len());
                let magnitude = if to > from {
                    (prefix[to] - prefix[from]) / (to - from) as f64
                } else {
                    0.0
                };
                weighted[frame] += center * magnitude;
                energies[frame] += magnitude;
            }
        }

        Ok(SpectralCurve::from_frames(weighted.into_iter().zip(energies).map(
            |(w, e)| (if e > 0.0 { w / e } else { 0.0 }, e),
        )))
    }

    fn kind(&self) -> SpectralBackend {
        SpectralBackend::FilterBank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn to_f64(samples: &[f32]) -> Vec<f64> {
        samples.iter().map(|&s| f64::from(s)).collect()
    }

    #[test]
    fn frame_count_matches_centred_framing() {
        check!(frame_count(0, 512) == 0);
        check!(frame_count(1, 512) == 1);
        check!(frame_count(511, 512) == 1);
        check!(frame_count(512, 512) == 2);
        check!(frame_count(44100, 512) == 87);
    }

    #[test]
    fn mean_centroid_skips_silent_frames() {
        let curve = SpectralCurve::from_frames([(100.0, 1.0), (0.0, 0.0), (300.0, 2.0)]);
        check!(curve.centroids() == [100.0, 0.0, 300.0]);
        check!(curve.energies() == [1.0, 0.0, 2.0]);
        check!(curve.mean_centroid(0..3) == 200.0);
        check!(curve.mean_centroid(1..2) == 0.0);
        check!(curve.mean_centroid(2..10) == 300.0);
        check!(curve.mean_centroid(5..10) == 0.0);
        check!(SpectralCurve::default().mean_centroid(0..1) == 0.0);
    }

    #[test]
    fn fft_centroid_of_pure_tone() {
        let sample_rate = 44100;
        let tone = to_f64(&test_utils::sine(1000.0, sample_rate, 0.5, 0.8));
        let strategy = FftSpectrum::new(2048, 512);
        let curve = strategy.spectral_curve(&tone, sample_rate).unwrap();

        check!(curve.len() == frame_count(tone.len(), 512));
        // Frames fully inside the tone.
        let middle = curve.centroids()[4..curve.len() - 4].to_vec();
        for centroid in middle {
            check!(approx_eq!(f64, centroid, 1000.0, epsilon = 30.0));
        }
    }

    #[test]
    fn fft_silence_has_zero_centroid() {
        let silence = vec![0.0; 4096];
        let curve = FftSpectrum::new(2048, 512)
            .spectral_curve(&silence, 44100)
            .unwrap();
        check!(curve.len() == 9);
        check!(curve.centroids().iter().all(|&c| c == 0.0));
        check!(curve.energies().iter().all(|&e| e == 0.0));
    }

    #[test]
    fn empty_signal_yields_empty_curve() {
        let config = AnalysisConfig::default();
        for backend in [SpectralBackend::Fft, SpectralBackend::FilterBank] {
            let strategy = backend.strategy(&config);
            check!(strategy.kind() == backend);
            check!(strategy.spectral_curve(&[], 44100).unwrap().is_empty());
        }
    }

    #[test]
    fn brighter_tone_has_higher_centroid() {
        let sample_rate = 44100;
        let config = AnalysisConfig::default();
        let low = to_f64(&test_utils::sine(200.0, sample_rate, 0.5, 0.8));
        let high = to_f64(&test_utils::sine(4000.0, sample_rate, 0.5, 0.8));

        for backend in [SpectralBackend::Fft, SpectralBackend::FilterBank] {
            let strategy = backend.strategy(&config);
            let low = strategy.spectral_curve(&low, sample_rate).unwrap();
            let high = strategy.spectral_curve(&high, sample_rate).unwrap();
            let frames = 4..low.len() - 4;
            check!(
                low.mean_centroid(frames.clone()) < high.mean_centroid(frames),
                "backend {:?}",
                backend
            );
        }
    }

    #[test]
    fn filter_bank_rejects_zero_sample_rate() {
        let strategy = SpectralBackend::FilterBank.strategy(&AnalysisConfig::default());
        check!(matches!(
            strategy.spectral_curve(&[0.0; 16], 0),
            Err(FilterDesignError::InvalidSampleRate(0))
        ));
    }
}
