//! Tunables of the onset analysis pipeline.
//!
//! Every constant the pipeline depends on lives in [`AnalysisConfig`]. The
//! [`Default`] implementation carries the values the pipeline was designed
//! and calibrated with.

use thiserror::Error;

/// Selects how the per-frame spectral-centroid curve is computed.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SpectralBackend {
    /// Short-time Fourier transform of the band-filtered signal.
    #[default]
    Fft,
    /// Bank of band-pass biquads, evaluated per hop frame. Cheaper on long
    /// signals and without an FFT, but with a coarser frequency resolution.
    FilterBank,
}

/// A tunable has a value the pipeline can't work with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidConfigError {
    /// The value must be finite and `> 0`.
    #[error("{name} must be finite and positive, but is {value}")]
    NotPositive { name: &'static str, value: f64 },
    /// The value must be finite and `>= 0`.
    #[error("{name} must be finite and not negative, but is {value}")]
    Negative { name: &'static str, value: f64 },
    /// A window or frame length is too small.
    #[error("{name} must be at least {min}, but is {value}")]
    TooSmall {
        name: &'static str,
        value: usize,
        min: usize,
    },
    /// The band-pass corners are in the wrong order.
    #[error("band-pass low corner ({low} Hz) must be below the high corner ({high} Hz)")]
    InvertedBand { low: f64, high: f64 },
    /// Attack and release weights are both zero.
    #[error("attack and release weights must not both be zero")]
    ZeroWeights,
}

/// Analysis configuration parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnalysisConfig {
    // Filters
    /// Low corner of the band-pass filter in Hz (default: 50.0).
    pub band_low_hz: f64,
    /// High corner of the band-pass filter in Hz (default: 8000.0).
    pub band_high_hz: f64,
    /// Corner of the envelope low-pass filter in Hz (default: 15.0).
    pub envelope_cutoff_hz: f64,

    // STFT
    /// Frame size of the short-time spectrum (default: 2048).
    pub fft_size: usize,
    /// Hop size of the short-time spectrum (default: 512).
    pub hop_size: usize,
    /// How the spectral-centroid curve is computed (default: FFT).
    pub spectral_backend: SpectralBackend,

    // Per-onset features
    /// Upper bound of an onset's analysis window in seconds (default: 0.5).
    pub max_window_s: f64,
    /// Fraction of the envelope peak that ends the release (default: 0.5).
    pub release_threshold_ratio: f64,
    /// Attack time mapped to a fully "slow" attack (default: 0.1 s).
    pub attack_reference_s: f64,
    /// Release time mapped to a fully "slow" release (default: 0.5 s).
    pub release_reference_s: f64,
    /// Weight of the attack in the velocity blend (default: 0.3).
    pub attack_weight: f64,
    /// Weight of the release in the velocity blend (default: 0.7).
    pub release_weight: f64,

    // Beat alignment
    /// Causal window of the spectral smoothing, in onsets (default: 20).
    pub spectral_smoothing_window: usize,
    /// Beat period used when the grid has a single beat (default: 1.0 s).
    pub beat_period_fallback_s: f64,

    // Series post-processing
    /// Causal window of the velocity smoothing, in onsets (default: 10).
    pub velocity_smoothing_window: usize,
    /// Exponent applied to the smoothed velocity (default: 10.0).
    pub strength_exponent: f64,
    /// Time gap that marks a pause, in seconds (default: 2.0).
    pub gap_time_threshold_s: f64,
    /// Beat-position gap that marks a pause, in beats (default: 8.0).
    pub gap_beat_threshold: f64,
    /// Strength added to the onset before a pause (default: 0.2).
    pub gap_boost: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            band_low_hz: 50.0,
            band_high_hz: 8000.0,
            envelope_cutoff_hz: 15.0,
            fft_size: 2048,
            hop_size: 512,
            spectral_backend: SpectralBackend::Fft,
            max_window_s: 0.5,
            release_threshold_ratio: 0.5,
            attack_reference_s: 0.1,
            release_reference_s: 0.5,
            attack_weight: 0.3,
            release_weight: 0.7,
            spectral_smoothing_window: 20,
            beat_period_fallback_s: 1.0,
            velocity_smoothing_window: 10,
            strength_exponent: 10.0,
            gap_time_threshold_s: 2.0,
            gap_beat_threshold: 8.0,
            gap_boost: 0.2,
        }
    }
}

impl AnalysisConfig {
    /// Checks that all tunables are usable.
    pub fn validate(&self) -> Result<(), InvalidConfigError> {
        fn positive(name: &'static str, value: f64) -> Result<(), InvalidConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(InvalidConfigError::NotPositive { name, value })
            }
        }
        fn non_negative(name: &'static str, value: f64) -> Result<(), InvalidConfigError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(InvalidConfigError::Negative { name, value })
            }
        }
        fn at_least(name: &'static str, value: usize, min: usize) -> Result<(), InvalidConfigError> {
            if value >= min {
                Ok(())
            } else {
                Err(InvalidConfigError::TooSmall { name, value, min })
            }
        }

        positive("band_low_hz", self.band_low_hz)?;
        positive("band_high_hz", self.band_high_hz)?;
        if self.band_low_hz >= self.band_high_hz {
            return Err(InvalidConfigError::InvertedBand {
                low: self.band_low_hz,
                high: self.band_high_hz,
            });
        }
        positive("envelope_cutoff_hz", self.envelope_cutoff_hz)?;

        at_least("fft_size", self.fft_size, 2)?;
        at_least("hop_size", self.hop_size, 1)?;

        positive("max_window_s", self.max_window_s)?;
        non_negative("release_threshold_ratio", self.release_threshold_ratio)?;
        positive("attack_reference_s", self.attack_reference_s)?;
        positive("release_reference_s", self.release_reference_s)?;
        non_negative("attack_weight", self.attack_weight)?;
        non_negative("release_weight", self.release_weight)?;
        if self.attack_weight + self.release_weight <= 0.0 {
            return Err(InvalidConfigError::ZeroWeights);
        }

        at_least("spectral_smoothing_window", self.spectral_smoothing_window, 1)?;
        positive("beat_period_fallback_s", self.beat_period_fallback_s)?;

        at_least("velocity_smoothing_window", self.velocity_smoothing_window, 1)?;
        positive("strength_exponent", self.strength_exponent)?;
        non_negative("gap_time_threshold_s", self.gap_time_threshold_s)?;
        non_negative("gap_beat_threshold", self.gap_beat_threshold)?;
        non_negative("gap_boost", self.gap_boost)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        check!(AnalysisConfig::default().validate() == Ok(()));
    }

    #[test]
    fn rejects_unusable_values() {
        let config = AnalysisConfig {
            hop_size: 0,
            ..Default::default()
        };
        check!(matches!(
            config.validate(),
            Err(InvalidConfigError::TooSmall { name: "hop_size", .. })
        ));

        let config = AnalysisConfig {
            band_low_hz: 9000.0,
            ..Default::default()
        };
        check!(matches!(
            config.validate(),
            Err(InvalidConfigError::InvertedBand { .. })
        ));

        let config = AnalysisConfig {
            strength_exponent: f64::NAN,
            ..Default::default()
        };
        check!(matches!(
            config.validate(),
            Err(InvalidConfigError::NotPositive {
                name: "strength_exponent",
                ..
            })
        ));

        let config = AnalysisConfig {
            attack_weight: 0.0,
            release_weight: 0.0,
            ..Default::default()
        };
        check!(config.validate() == Err(InvalidConfigError::ZeroWeights));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AnalysisConfig = toml::from_str(
            r#"
            strength_exponent = 4.0
            spectral_backend = "filter-bank"
            "#,
        )
        .unwrap();
        check!(config.strength_exponent == 4.0);
        check!(config.spectral_backend == SpectralBackend::FilterBank);
        check!(
            config
                == AnalysisConfig {
                    strength_exponent: 4.0,
                    spectral_backend: SpectralBackend::FilterBank,
                    ..Default::default()
                }
        );

        let empty: AnalysisConfig = toml::from_str("").unwrap();
        check!(empty == AnalysisConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn toml_round_trip() {
        let config = AnalysisConfig {
            hop_size: 256,
            spectral_backend: SpectralBackend::FilterBank,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        check!(text.contains("spectral_backend = \"filter-bank\""));
        let parsed: AnalysisConfig = toml::from_str(&text).unwrap();
        check!(parsed == config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn unknown_backend_is_rejected() {
        check!(toml::from_str::<AnalysisConfig>("spectral_backend = \"gpu\"").is_err());
    }
}
