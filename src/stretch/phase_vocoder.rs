//! Per-bin phase tracking for the phase vocoder.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

pub(crate) const TWO_PI: f64 = 2.0 * PI;

/// Measured and accumulated phase for every `(channel, bin)` pair.
///
/// All arrays are flat `channel * bands + bin`. Phases are kept in `f64` so
/// accumulation over long streams does not drift.
#[derive(Debug, Clone)]
pub struct PhaseVocoder {
    bands: usize,
    fft_samples: usize,
    /// Analysis phase of the previous frame.
    prev_phase: Vec<f64>,
    /// Instantaneous frequency (cycles per sample) of the latest frame.
    frequency: Vec<f64>,
    /// Synthesis phase, wrapped to `[-PI, PI]`.
    output_phase: Vec<f64>,
}

impl PhaseVocoder {
    pub fn new(channels: usize, bands: usize, fft_samples: usize) -> Self {
        let len = channels * bands;
        let mut pv = Self {
            bands,
            fft_samples,
            prev_phase: vec![0.0; len],
            frequency: vec![0.0; len],
            output_phase: vec![0.0; len],
        };
        pv.reset();
        pv
    }

    pub fn reset(&mut self) {
        self.prev_phase.fill(0.0);
        self.output_phase.fill(0.0);
        let n = self.fft_samples as f64;
        for (i, f) in self.frequency.iter_mut().enumerate() {
            *f = (i % self.bands) as f64 / n;
        }
    }

    fn range(&self, channel: usize) -> std::ops::Range<usize> {
        channel * self.bands..(channel + 1) * self.bands
    }

    /// Uses `spectrum` as the previous frame for the next measurement.
    pub fn set_reference(&mut self, channel: usize, spectrum: &[Complex<f32>]) {
        let range = self.range(channel);
        for (prev, bin) in self.prev_phase[range].iter_mut().zip(spectrum) {
            *prev = bin.im.atan2(bin.re) as f64;
        }
    }

    /// Measures each bin's instantaneous frequency from the phase advance
    /// since the reference frame, `hop` input samples earlier, and makes
    /// `spectrum` the new reference.
    pub fn measure(&mut self, channel: usize, spectrum: &[Complex<f32>], hop: usize) {
        debug_assert!(hop > 0, "phase advance needs a positive hop");
        let range = self.range(channel);
        let hop = hop as f64;
        let n = self.fft_samples as f64;
        let prev = &mut self.prev_phase[range.clone()];
        let freq = &mut self.frequency[range];
        for (b, ((bin, prev), freq)) in spectrum.iter().zip(prev).zip(freq).enumerate() {
            let phase = bin.im.atan2(bin.re) as f64;
            let expected = TWO_PI * b as f64 * hop / n;
            let deviation = wrap_phase(phase - *prev - expected);
            *freq = b as f64 / n + deviation / (TWO_PI * hop);
            *prev = phase;
        }
    }

    pub fn frequency(&self, channel: usize) -> &[f64] {
        &self.frequency[self.range(channel)]
    }

    /// Advances a bin's output phase by `freq` cycles per sample over `hop`
    /// output samples and returns the new phase.
    #[inline]
    pub fn advance(&mut self, channel: usize, bin: usize, freq: f64, hop: usize) -> f64 {
        let slot = &mut self.output_phase[channel * self.bands + bin];
        *slot = wrap_phase(*slot + wrap_phase(TWO_PI * freq * hop as f64));
        *slot
    }

    #[inline]
    pub fn set_output_phase(&mut self, channel: usize, bin: usize, phase: f64) {
        self.output_phase[channel * self.bands + bin] = wrap_phase(phase);
    }

    #[inline]
    pub fn output_phase(&self, channel: usize, bin: usize) -> f64 {
        self.output_phase[channel * self.bands + bin]
    }
}

/// Wraps a phase value to `[-PI, PI]`.
#[inline]
pub(crate) fn wrap_phase(phase: f64) -> f64 {
    let p = phase + PI;
    p - (p / TWO_PI).floor() * TWO_PI - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wrap_phase() {
        assert_abs_diff_eq!(wrap_phase(0.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_phase(PI + 0.1), -PI + 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_phase(-PI - 0.1), PI - 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_phase(10.0 * PI + 0.5), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_phase(-10.0 * PI - 0.5), -0.5, epsilon = 1e-9);
    }

    /// Spectrum of a stationary sinusoid at `freq` observed at time `t`.
    fn tone_spectrum(bands: usize, freq: f64, t: f64) -> Vec<Complex<f32>> {
        (0..bands)
            .map(|_| Complex::from_polar(1.0, (TWO_PI * freq * t) as f32))
            .collect()
    }

    #[test]
    fn test_measure_recovers_off_bin_frequency() {
        let n = 64;
        let bands = n / 2 + 1;
        let mut pv = PhaseVocoder::new(1, bands, n);
        // Halfway between bins 5 and 6
        let freq = 5.5 / n as f64;
        let hop = 16;
        pv.set_reference(0, &tone_spectrum(bands, freq, 0.0));
        pv.measure(0, &tone_spectrum(bands, freq, hop as f64), hop);
        // Bins near the tone see its true frequency
        for b in 4..8 {
            assert_abs_diff_eq!(pv.frequency(0)[b], freq, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_advance_matches_phase_progression() {
        let mut pv = PhaseVocoder::new(2, 9, 16);
        pv.set_output_phase(1, 3, 0.25);
        let freq = 3.0 / 16.0;
        let phase = pv.advance(1, 3, freq, 4);
        assert_abs_diff_eq!(phase, wrap_phase(0.25 + TWO_PI * freq * 4.0), epsilon = 1e-12);
        assert_abs_diff_eq!(pv.output_phase(1, 3), phase);
        // Other channel untouched
        assert_eq!(pv.output_phase(0, 3), 0.0);
    }

    #[test]
    fn test_output_phase_stays_wrapped() {
        let mut pv = PhaseVocoder::new(1, 3, 4);
        for _ in 0..10_000 {
            let phase = pv.advance(0, 1, 0.3131, 1000);
            assert!((-PI..=PI).contains(&phase));
        }
    }

    #[test]
    fn test_reset_restores_bin_centres() {
        let n = 32;
        let mut pv = PhaseVocoder::new(1, n / 2 + 1, n);
        pv.measure(0, &tone_spectrum(n / 2 + 1, 0.1, 7.0), 3);
        pv.reset();
        assert_abs_diff_eq!(pv.frequency(0)[4], 4.0 / n as f64);
        assert_eq!(pv.output_phase(0, 4), 0.0);
    }
}
