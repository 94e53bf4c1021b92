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

//! Synthetic signals for the unit tests.

use core::f64::consts::PI;

fn sample_count(sample_rate: u32, duration_s: f64) -> usize {
    (f64::from(sample_rate) * duration_s) as usize
}

/// Sine tone of constant amplitude.
pub fn sine(frequency_hz: f64, sample_rate: u32, duration_s: f64, amplitude: f64) -> Vec<f32> {
    (0..sample_count(sample_rate, duration_s))
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            (amplitude * (2.0 * PI * frequency_hz * t).sin()) as f32
        })
        .collect()
}

/// Sine tone with full amplitude at the first sample, decaying exponentially
/// with time constant `decay_s`. Sounds like a short hit.
pub fn decaying_burst(
    frequency_hz: f64,
    sample_rate: u32,
    duration_s: f64,
    decay_s: f64,
) -> Vec<f32> {
    (0..sample_count(sample_rate, duration_s))
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            ((-t / decay_s).exp() * (2.0 * PI * frequency_hz * t).sin()) as f32
        })
        .collect()
}

/// Silence of the given duration.
pub fn silence(sample_rate: u32, duration_s: f64) -> Vec<f32> {
    vec![0.0; sample_count(sample_rate, duration_s)]
}

/// A signal of `duration_s` with one [`decaying_burst`] at each onset time.
/// Returns the signal and the onset sample positions.
pub fn bursts_at(sample_rate: u32, duration_s: f64, onsets_s: &[f64]) -> (Vec<f32>, Vec<usize>) {
    let mut signal = silence(sample_rate, duration_s);
    let burst = decaying_burst(1000.0, sample_rate, 0.3, 0.03);
    let onsets = onsets_s
        .iter()
        .map(|&t| sample_count(sample_rate, t))
        .collect::<Vec<_>>();
    for &onset in &onsets {
        for (dst, src) in signal.iter_mut().skip(onset).zip(&burst) {
            *dst += *src;
        }
    }
    (signal, onsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_have_expected_length() {
        check!(sine(440.0, 44100, 0.5, 1.0).len() == 22050);
        check!(silence(48000, 1.0).len() == 48000);
        let (signal, onsets) = bursts_at(8000, 2.0, &[0.0, 0.5, 1.5]);
        check!(signal.len() == 16000);
        check!(onsets == vec![0, 4000, 12000]);
        check!(signal[..4000].iter().any(|s| s.abs() > 0.5));
        check!(signal[3000..4000].iter().all(|s| s.abs() < 0.01));
    }
}
