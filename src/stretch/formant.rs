//! Formant preservation and shifting.
//!
//! The spectral envelope is estimated from the summed channel energy with a
//! peak-hold/valley-fill filter whose width follows the estimated
//! fundamental. Each bin's energy is then scaled so the output carries the
//! envelope of the input at `output_freq / formant_factor`.

use crate::stretch::freq_map::{sanitize_factor, semitones_to_factor, FrequencyMap};

/// Number of [`FormantEnvelope::step`] calls per block.
pub const FORMANT_STEPS: usize = 3;

const ENERGY_EPSILON: f32 = 1e-30;

/// Caller-facing formant settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormantShift {
    factor: f32,
    compensate_pitch: bool,
    /// Normalised fundamental; zero or less means estimate it.
    base: f32,
}

impl Default for FormantShift {
    fn default() -> Self {
        Self {
            factor: 1.0,
            compensate_pitch: false,
            base: 0.0,
        }
    }
}

impl FormantShift {
    pub fn set_factor(&mut self, factor: f32, compensate_pitch: bool) {
        self.factor = sanitize_factor(factor);
        self.compensate_pitch = compensate_pitch;
    }

    pub fn set_semitones(&mut self, semitones: f32, compensate_pitch: bool) {
        self.set_factor(semitones_to_factor(semitones), compensate_pitch);
    }

    pub fn set_base(&mut self, freq: f32) {
        self.base = if freq.is_finite() { freq } else { 0.0 };
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn compensate_pitch(&self) -> bool {
        self.compensate_pitch
    }

    pub fn base(&self) -> f32 {
        self.base
    }

    /// Whether the formant stage changes anything for a map that is
    /// `mapped` (not the identity).
    pub fn is_active(&self, mapped: bool) -> bool {
        self.factor != 1.0 || (self.compensate_pitch && mapped)
    }

    #[inline]
    fn inv_map(&self, freq: f32) -> f32 {
        freq / self.factor
    }
}

/// Envelope and fundamental estimate, reused across blocks.
#[derive(Debug, Clone)]
pub struct FormantEnvelope {
    bands: usize,
    fft_samples: usize,
    envelope: Vec<f32>,
    /// Fundamental in bins used for the current block.
    freq_estimate: f32,
    estimate_weighted: f32,
    estimate_weight: f32,
}

impl FormantEnvelope {
    pub fn new(bands: usize, fft_samples: usize) -> Self {
        Self {
            bands,
            fft_samples,
            envelope: vec![0.0; bands],
            freq_estimate: 0.0,
            estimate_weighted: 0.0,
            estimate_weight: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.envelope.fill(0.0);
        self.freq_estimate = 0.0;
        self.estimate_weighted = 0.0;
        self.estimate_weight = 0.0;
    }

    /// Fundamental (in bins) used by the latest block.
    pub fn freq_estimate(&self) -> f32 {
        self.freq_estimate
    }

    /// Runs step `step` of [`FORMANT_STEPS`] on `energy` (flat
    /// `channel * bands + bin`), which the last step rescales in place.
    pub fn step(
        &mut self,
        step: usize,
        energy: &mut [f32],
        shift: &FormantShift,
        map: &FrequencyMap,
    ) {
        match step {
            0 => {
                self.envelope.fill(0.0);
                for channel in energy.chunks_exact(self.bands) {
                    for (sum, &e) in self.envelope.iter_mut().zip(channel) {
                        *sum += e;
                    }
                }
                self.freq_estimate = if shift.base() > 0.0 {
                    shift.base() * self.fft_samples as f32
                } else {
                    self.estimate_frequency()
                };
            }
            1 => self.smooth_envelope(),
            _ => self.apply(energy, shift, map),
        }
    }

    /// Very rough pitch estimate from the three strongest local maxima of
    /// the summed energy, smoothed over blocks.
    fn estimate_frequency(&mut self) -> f32 {
        let e = &self.envelope;
        let mut peaks = [0usize; 3];
        for b in 1..self.bands.saturating_sub(1) {
            let value = e[b];
            if value < e[b - 1] || value < e[b + 1] {
                continue;
            }
            if value > e[peaks[0]] {
                if value > e[peaks[1]] {
                    if value > e[peaks[2]] {
                        peaks = [peaks[1], peaks[2], b];
                    } else {
                        peaks = [peaks[1], b, peaks[2]];
                    }
                } else {
                    peaks[0] = b;
                }
            }
        }

        let mut estimate = peaks[2] as i64;
        for &other in [peaks[1], peaks[0]].iter() {
            if e[other] <= e[peaks[2]] * 0.1 {
                break;
            }
            let diff = (estimate - other as i64).abs();
            if diff > estimate / 8 && diff < estimate * 7 / 8 {
                estimate %= diff;
            }
        }

        let weight = e[peaks[2]];
        self.estimate_weighted += (estimate as f32 * weight - self.estimate_weighted) * 0.25;
        self.estimate_weight += (weight - self.estimate_weight) * 0.25;
        self.estimate_weighted / (self.estimate_weight + ENERGY_EPSILON)
    }

    /// Peak-hold then valley-fill, each as two backward/forward passes.
    fn smooth_envelope(&mut self) {
        let mut decay = 1.0 - 1.0 / (self.freq_estimate.max(1.0) * 0.5 + 1.0);
        let mut e = 0.0f32;
        for _ in 0..2 {
            for value in self.envelope.iter_mut().rev() {
                e = value.max(e * decay);
                *value = e;
            }
            for value in self.envelope.iter_mut() {
                e = value.max(e * decay);
                *value = e;
            }
        }
        decay = 1.0 / decay;
        for _ in 0..2 {
            for value in self.envelope.iter_mut().rev() {
                e = value.min(e * decay);
                *value = e;
            }
            for value in self.envelope.iter_mut() {
                e = value.min(e * decay);
                *value = e;
            }
        }
    }

    /// Envelope at a fractional bin, zero below bin 0.
    fn envelope_at(&self, bin: f32) -> f32 {
        if bin.is_nan() || bin < 0.0 {
            return 0.0;
        }
        let top = self.bands - 1;
        let bin = bin.min(top as f32);
        let low = bin.floor() as usize;
        let high = (low + 1).min(top);
        let frac = bin - low as f32;
        self.envelope[low] + (self.envelope[high] - self.envelope[low]) * frac
    }

    fn apply(&self, energy: &mut [f32], shift: &FormantShift, map: &FrequencyMap) {
        let n = self.fft_samples as f32;
        for b in 0..self.bands {
            let input_freq = b as f32 / n;
            let output_freq = if shift.compensate_pitch() {
                map.map(input_freq)
            } else {
                input_freq
            };
            let target = self.envelope_at(shift.inv_map(output_freq) * n);
            let ratio = target / (self.envelope[b] + ENERGY_EPSILON);
            for channel in energy.chunks_exact_mut(self.bands) {
                channel[b] *= ratio;
            }
        }
    }
}
