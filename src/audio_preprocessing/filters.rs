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

//! Band-pass and envelope low-pass filters, memoized by sample rate.
//!
//! Each filter is a 4th order Butterworth design expressed as a cascade of
//! [`biquad`] sections. Designing the coefficients is cheap compared to
//! filtering, but sample rates repeat a lot within a session (most files are
//! 44.1 or 48 kHz), so [`SignalFilters`] keeps the designs of the most
//! recently seen rates around.

use crate::config::AnalysisConfig;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, Hertz, Type};
use ringbuffer::{ConstGenericRingBuffer, RingBuffer};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Number of sample rates each cache keeps.
pub const FILTER_CACHE_CAPACITY: usize = 8;

/// Cutoff frequencies are clamped to this fraction of the Nyquist frequency.
const MAX_NYQUIST_RATIO: f64 = 0.99;

/// Q factors of the two second-order sections of a 4th order Butterworth
/// filter: `1 / (2 * cos(k * PI / 8))` for `k = 1, 3`.
const BUTTERWORTH_4_QS: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Possible errors when designing a filter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterDesignError {
    /// The sample rate must be positive.
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    /// The cutoff frequency is not a positive, finite number.
    #[error("invalid cutoff frequency: {0} Hz")]
    InvalidCutoff(f64),
    /// The biquad crate refused the parameters.
    #[error("biquad design failed: {0}")]
    Biquad(String),
}

/// A cascade of second-order sections describing one filter.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    sections: Vec<Coefficients<f64>>,
}

impl FilterSpec {
    /// 4th order Butterworth low-pass.
    pub fn lowpass(sample_rate: u32, cutoff_hz: f64) -> Result<Self, FilterDesignError> {
        let mut sections = Vec::with_capacity(2);
        Self::push_butterworth(&mut sections, Type::LowPass, sample_rate, cutoff_hz)?;
        Ok(Self { sections })
    }

    /// 4th order Butterworth high-pass.
    pub fn highpass(sample_rate: u32, cutoff_hz: f64) -> Result<Self, FilterDesignError> {
        let mut sections = Vec::with_capacity(2);
        Self::push_butterworth(&mut sections, Type::HighPass, sample_rate, cutoff_hz)?;
        Ok(Self { sections })
    }

    /// Band-pass built from a 4th order high-pass at `low_hz` followed by a
    /// 4th order low-pass at `high_hz`.
    pub fn bandpass(sample_rate: u32, low_hz: f64, high_hz: f64) -> Result<Self, FilterDesignError> {
        let mut sections = Vec::with_capacity(4);
        Self::push_butterworth(&mut sections, Type::HighPass, sample_rate, low_hz)?;
        Self::push_butterworth(&mut sections, Type::LowPass, sample_rate, high_hz)?;
        Ok(Self { sections })
    }

    /// Returns the second-order sections in processing order.
    #[must_use]
    pub fn sections(&self) -> &[Coefficients<f64>] {
        &self.sections
    }

    /// Runs the samples through a fresh filter state and collects the
    /// output. The filter starts at rest (zero state).
    pub fn apply(&self, samples: impl IntoIterator<Item = f64>) -> Vec<f64> {
        let mut stages = self
            .sections
            .iter()
            .map(|coefficients| DirectForm2Transposed::<f64>::new(*coefficients))
            .collect::<Vec<_>>();

        samples
            .into_iter()
            .map(|sample| {
                stages
                    .iter_mut()
                    .fold(sample, |value, stage| stage.run(value))
            })
            .collect()
    }

    fn push_butterworth(
        sections: &mut Vec<Coefficients<f64>>,
        filter_type: Type<f64>,
        sample_rate: u32,
        cutoff_hz: f64,
    ) -> Result<(), FilterDesignError> {
        if sample_rate == 0 {
            return Err(FilterDesignError::InvalidSampleRate(sample_rate));
        }
        if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 {
            return Err(FilterDesignError::InvalidCutoff(cutoff_hz));
        }

        let fs = f64::from(sample_rate);
        let f0 = clamp_to_nyquist(cutoff_hz, fs);

        let fs = Hertz::<f64>::from_hz(fs).map_err(biquad_error)?;
        let f0 = Hertz::<f64>::from_hz(f0).map_err(biquad_error)?;

        for q in BUTTERWORTH_4_QS {
            let coefficients =
                Coefficients::<f64>::from_params(filter_type, fs, f0, q).map_err(biquad_error)?;
            sections.push(coefficients);
        }
        Ok(())
    }
}

fn biquad_error(err: biquad::Errors) -> FilterDesignError {
    FilterDesignError::Biquad(format!("{err:?}"))
}

/// Clamps a cutoff frequency below the Nyquist frequency of `sample_rate_hz`.
#[must_use]
pub fn clamp_to_nyquist(cutoff_hz: f64, sample_rate_hz: f64) -> f64 {
    let nyquist = sample_rate_hz / 2.0;
    cutoff_hz.min(nyquist * MAX_NYQUIST_RATIO)
}

/// Least recently used entry first.
type CacheEntries = ConstGenericRingBuffer<(u32, Arc<FilterSpec>), FILTER_CACHE_CAPACITY>;

/// Bounded memoization table of filter designs keyed by sample rate. When
/// full, the least recently used rate is evicted.
///
/// Hits on the most recent rate only take a shared lock. Misses design the
/// filter without holding any lock; if two workers race on the same unseen
/// rate, the first insertion is kept and the other design is dropped. Both
/// are identical anyway.
#[derive(Debug)]
struct FilterCache {
    entries: RwLock<CacheEntries>,
}

impl FilterCache {
    fn new() -> Self {
        Self {
            entries: RwLock::new(ConstGenericRingBuffer::new()),
        }
    }

    fn get_or_design(
        &self,
        sample_rate: u32,
        design: impl FnOnce() -> Result<FilterSpec, FilterDesignError>,
    ) -> Result<Arc<FilterSpec>, FilterDesignError> {
        if let Some(spec) = self.lookup(sample_rate) {
            log::trace!("filter cache hit: {sample_rate} Hz");
            return Ok(spec);
        }

        log::trace!("filter cache miss: {sample_rate} Hz");
        let spec = Arc::new(design()?);

        // The cached data is immutable, so a poisoned lock is still usable.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = Self::promote(&mut entries, sample_rate) {
            return Ok(existing);
        }
        entries.push((sample_rate, Arc::clone(&spec)));
        Ok(spec)
    }

    fn lookup(&self, sample_rate: u32) -> Option<Arc<FilterSpec>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.iter().last() {
                Some((rate, spec)) if *rate == sample_rate => return Some(Arc::clone(spec)),
                _ => {}
            }
            if !entries.iter().any(|(rate, _)| *rate == sample_rate) {
                return None;
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Self::promote(&mut entries, sample_rate)
    }

    /// Moves the entry of `sample_rate` to the most recently used position.
    fn promote(entries: &mut CacheEntries, sample_rate: u32) -> Option<Arc<FilterSpec>> {
        let hit = entries
            .iter()
            .find(|(rate, _)| *rate == sample_rate)
            .map(|(_, spec)| Arc::clone(spec))?;
        let others = entries
            .iter()
            .filter(|(rate, _)| *rate != sample_rate)
            .cloned()
            .collect::<Vec<_>>();
        entries.clear();
        for entry in others {
            entries.push(entry);
        }
        entries.push((sample_rate, Arc::clone(&hit)));
        Some(hit)
    }

    fn sample_rates(&self) -> Vec<u32> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(rate, _)| *rate).collect()
    }
}

/// Provides the band-pass and the envelope low-pass filter for a sample
/// rate. Designs are memoized per rate, see [`FILTER_CACHE_CAPACITY`].
///
/// The struct is [`Sync`]; share one instance (e.g., behind an [`Arc`])
/// between workers that analyze files concurrently.
#[derive(Debug)]
pub struct SignalFilters {
    band_low_hz: f64,
    band_high_hz: f64,
    lowpass_hz: f64,
    band_cache: FilterCache,
    lowpass_cache: FilterCache,
}

impl SignalFilters {
    /// Creates a new set of filters with the given corner frequencies.
    #[must_use]
    pub fn new(band_low_hz: f64, band_high_hz: f64, lowpass_hz: f64) -> Self {
        Self {
            band_low_hz,
            band_high_hz,
            lowpass_hz,
            band_cache: FilterCache::new(),
            lowpass_cache: FilterCache::new(),
        }
    }

    /// Creates a new set of filters with the corners of the config.
    #[must_use]
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            config.band_low_hz,
            config.band_high_hz,
            config.envelope_cutoff_hz,
        )
    }

    /// Band-pass filter that removes sub-bass rumble and high-frequency hiss.
    pub fn band_filter(&self, sample_rate: u32) -> Result<Arc<FilterSpec>, FilterDesignError> {
        self.band_cache.get_or_design(sample_rate, || {
            FilterSpec::bandpass(sample_rate, self.band_low_hz, self.band_high_hz)
        })
    }

    /// Low-pass filter that turns a rectified signal into an envelope.
    pub fn lowpass_filter(&self, sample_rate: u32) -> Result<Arc<FilterSpec>, FilterDesignError> {
        self.lowpass_cache
            .get_or_design(sample_rate, || FilterSpec::lowpass(sample_rate, self.lowpass_hz))
    }

    /// Sample rates with a memoized band-pass design, least recently used
    /// first.
    #[must_use]
    pub fn cached_sample_rates(&self) -> Vec<u32> {
        self.band_cache.sample_rates()
    }
}

impl Default for SignalFilters {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn is_send_and_sync() {
        fn accept<I: Send + Sync>() {}

        accept::<SignalFilters>();
    }

    #[test]
    fn cutoff_is_clamped_below_nyquist() {
        check!(clamp_to_nyquist(8000.0, 44100.0) == 8000.0);
        check!(approx_eq!(f64, clamp_to_nyquist(8000.0, 8000.0), 3960.0, ulps = 2));
        // Designing at a low sample rate must not fail.
        check!(FilterSpec::bandpass(8000, 50.0, 8000.0).is_ok());
        check!(FilterSpec::bandpass(16000, 50.0, 8000.0).is_ok());
    }

    #[test]
    fn rejects_invalid_parameters() {
        check!(matches!(
            FilterSpec::lowpass(0, 15.0),
            Err(FilterDesignError::InvalidSampleRate(0))
        ));
        check!(matches!(
            FilterSpec::lowpass(44100, -1.0),
            Err(FilterDesignError::InvalidCutoff(_))
        ));
        check!(matches!(
            FilterSpec::lowpass(44100, f64::NAN),
            Err(FilterDesignError::InvalidCutoff(_))
        ));
    }

    #[test]
    fn has_expected_number_of_sections() {
        check!(FilterSpec::lowpass(44100, 15.0).unwrap().sections().len() == 2);
        check!(FilterSpec::highpass(44100, 50.0).unwrap().sections().len() == 2);
        check!(FilterSpec::bandpass(44100, 50.0, 8000.0).unwrap().sections().len() == 4);
    }

    #[test]
    fn lowpass_passes_dc_and_blocks_high_frequencies() {
        let sample_rate = 44100;
        let lowpass = FilterSpec::lowpass(sample_rate, 15.0).unwrap();

        let dc = lowpass.apply(core::iter::repeat(1.0).take(sample_rate as usize));
        check!(approx_eq!(f64, *dc.last().unwrap(), 1.0, epsilon = 0.01));

        let tone = test_utils::sine(1000.0, sample_rate, 1.0, 1.0);
        let filtered = lowpass.apply(tone.iter().map(|&s| f64::from(s)));
        let tail_peak = filtered[filtered.len() / 2..]
            .iter()
            .fold(0.0_f64, |max, &value| max.max(value.abs()));
        check!(tail_peak < 0.001);
    }

    #[test]
    fn bandpass_blocks_dc_and_passes_mid_frequencies() {
        let sample_rate = 44100;
        let bandpass = FilterSpec::bandpass(sample_rate, 50.0, 8000.0).unwrap();

        let dc = bandpass.apply(core::iter::repeat(1.0).take(sample_rate as usize));
        check!(dc.last().unwrap().abs() < 0.01);

        let tone = test_utils::sine(1000.0, sample_rate, 1.0, 1.0);
        let filtered = bandpass.apply(tone.iter().map(|&s| f64::from(s)));
        let tail_peak = filtered[filtered.len() / 2..]
            .iter()
            .fold(0.0_f64, |max, &value| max.max(value.abs()));
        check!(approx_eq!(f64, tail_peak, 1.0, epsilon = 0.05));
    }

    #[test]
    fn memoizes_designs_per_sample_rate() {
        let filters = SignalFilters::default();
        let a = filters.band_filter(44100).unwrap();
        let b = filters.band_filter(44100).unwrap();
        check!(Arc::ptr_eq(&a, &b));

        let c = filters.band_filter(48000).unwrap();
        check!(!Arc::ptr_eq(&a, &c));
        check!(filters.cached_sample_rates() == vec![44100, 48000]);

        let l1 = filters.lowpass_filter(44100).unwrap();
        let l2 = filters.lowpass_filter(44100).unwrap();
        check!(Arc::ptr_eq(&l1, &l2));
    }

    #[test]
    fn cache_is_bounded() {
        let filters = SignalFilters::default();
        let rates = (1..=10).map(|i| 8000 * i).collect::<Vec<u32>>();
        for &rate in &rates {
            filters.band_filter(rate).unwrap();
        }
        let cached = filters.cached_sample_rates();
        check!(cached.len() == FILTER_CACHE_CAPACITY);
        check!(cached == rates[rates.len() - FILTER_CACHE_CAPACITY..].to_vec());
    }

    #[test]
    fn frequently_used_rate_is_not_evicted() {
        let filters = SignalFilters::default();
        let first = filters.band_filter(44100).unwrap();
        for i in 1..=FILTER_CACHE_CAPACITY as u32 {
            filters.band_filter(i * 1000 + 1).unwrap();
            let again = filters.band_filter(44100).unwrap();
            check!(Arc::ptr_eq(&first, &again));
        }

        let cached = filters.cached_sample_rates();
        check!(cached.len() == FILTER_CACHE_CAPACITY);
        check!(cached.last() == Some(&44100));
        // The least recently used rate went instead.
        check!(!cached.contains(&1001));
        check!(cached[0] == 2001);
    }

    #[test]
    fn concurrent_misses_share_one_design() {
        let filters = Arc::new(SignalFilters::default());
        let barrier = Barrier::new(8);
        let designs = thread::scope(|scope| {
            let (filters, barrier) = (&filters, &barrier);
            let handles = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        filters.band_filter(44100).unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        check!(designs.iter().all(|spec| Arc::ptr_eq(spec, &designs[0])));
        check!(Arc::ptr_eq(&designs[0], &filters.band_filter(44100).unwrap()));
        check!(filters.cached_sample_rates() == vec![44100]);
    }

    #[test]
    fn invalid_sample_rate_is_not_cached() {
        let filters = SignalFilters::default();
        check!(matches!(
            filters.band_filter(0),
            Err(FilterDesignError::InvalidSampleRate(0))
        ));
        check!(filters.cached_sample_rates().is_empty());
    }
}
