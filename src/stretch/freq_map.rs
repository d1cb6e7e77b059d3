//! Frequency mapping: transposition with a tonality limit, custom maps, and
//! the peak-anchored output map that applies either to a spectrum.

use std::fmt;

/// Smallest and largest accepted transpose/formant factors.
pub const MIN_FACTOR: f32 = 1.0 / 64.0;
pub const MAX_FACTOR: f32 = 64.0;

/// Number of [`SpectralMap::smooth_step`] calls per block.
pub const SMOOTH_STEPS: usize = 3;

/// Custom map on normalised frequency (cycles per sample).
pub type FreqMapFn = Box<dyn Fn(f32) -> f32 + Send>;

/// Clamps a transpose or formant factor into the supported range. A negative
/// factor shifts down by its magnitude, so `-2` means one octave down. Zero
/// and non-finite values mean "unchanged".
pub fn sanitize_factor(factor: f32) -> f32 {
    if !factor.is_finite() || factor == 0.0 {
        return 1.0;
    }
    let factor = if factor < 0.0 { -1.0 / factor } else { factor };
    factor.clamp(MIN_FACTOR, MAX_FACTOR)
}

pub fn semitones_to_factor(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

/// Active input → output frequency mapping.
pub struct FrequencyMap {
    factor: f32,
    /// Normalised frequency above which transposition becomes a shift.
    tonality_limit: f32,
    custom: Option<FreqMapFn>,
}

impl fmt::Debug for FrequencyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyMap")
            .field("factor", &self.factor)
            .field("tonality_limit", &self.tonality_limit)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for FrequencyMap {
    fn default() -> Self {
        Self {
            factor: 1.0,
            tonality_limit: f32::INFINITY,
            custom: None,
        }
    }
}

impl FrequencyMap {
    /// Sets a transposition and drops any custom map. A tonality limit that
    /// is not positive and finite disables the limit.
    pub fn set_transpose(&mut self, factor: f32, tonality_limit: f32) {
        self.factor = sanitize_factor(factor);
        self.tonality_limit = if tonality_limit.is_finite() && tonality_limit > 0.0 {
            tonality_limit
        } else {
            f32::INFINITY
        };
        self.custom = None;
    }

    pub fn set_custom(&mut self, map: FreqMapFn) {
        self.custom = Some(map);
    }

    pub fn clear_custom(&mut self) {
        self.custom = None;
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn tonality_limit(&self) -> f32 {
        self.tonality_limit
    }

    pub fn has_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// True when the map is not the identity.
    pub fn is_mapped(&self) -> bool {
        self.custom.is_some() || self.factor != 1.0
    }

    /// Maps a normalised input frequency to its output frequency.
    #[inline]
    pub fn map(&self, freq: f32) -> f32 {
        if let Some(custom) = &self.custom {
            return custom(freq);
        }
        if freq > self.tonality_limit {
            freq + (self.factor - 1.0) * self.tonality_limit
        } else {
            freq * self.factor
        }
    }
}

/// Where an output bin reads from in the input spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    /// Fractional input bin.
    pub input_bin: f32,
    /// d(input bin)/d(output bin); scales energy so spread peaks keep power.
    pub freq_grad: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    input: f32,
    output: f32,
}

/// Peak detection and the resulting output → input bin map.
#[derive(Debug, Clone)]
pub struct SpectralMap {
    bands: usize,
    energy: Vec<f32>,
    smoothed: Vec<f32>,
    smooth_state: f32,
    peaks: Vec<Peak>,
    output_map: Vec<MapPoint>,
}

impl SpectralMap {
    pub fn new(bands: usize) -> Self {
        let mut map = Self {
            bands,
            energy: vec![0.0; bands],
            smoothed: vec![0.0; bands],
            smooth_state: 0.0,
            peaks: Vec::with_capacity(bands / 2 + 1),
            output_map: Vec::with_capacity(bands),
        };
        map.set_identity();
        map
    }

    pub fn reset(&mut self) {
        self.energy.fill(0.0);
        self.smoothed.fill(0.0);
        self.smooth_state = 0.0;
        self.peaks.clear();
        self.set_identity();
    }

    /// Every output bin reads its own input bin.
    pub fn set_identity(&mut self) {
        self.output_map.clear();
        self.output_map.extend((0..self.bands).map(|b| MapPoint {
            input_bin: b as f32,
            freq_grad: 1.0,
        }));
    }

    /// One step of energy smoothing. Step 0 sums `channel_energy` (flat
    /// `channel * bands + bin`) across channels; later steps each run a
    /// backward and forward one-pole pass over roughly `smoothing_bins`.
    pub fn smooth_step(&mut self, step: usize, channel_energy: &[f32], smoothing_bins: f32) {
        if step == 0 {
            self.energy.fill(0.0);
            for channel in channel_energy.chunks_exact(self.bands) {
                for (sum, &e) in self.energy.iter_mut().zip(channel) {
                    *sum += e;
                }
            }
            self.smoothed.copy_from_slice(&self.energy);
            self.smooth_state = 0.0;
            return;
        }
        let slew = 1.0 / (1.0 + smoothing_bins * 0.5);
        let mut smoothed = self.smooth_state;
        for value in self.smoothed.iter_mut().rev() {
            smoothed += (*value - smoothed) * slew;
            *value = smoothed;
        }
        for value in self.smoothed.iter_mut() {
            smoothed += (*value - smoothed) * slew;
            *value = smoothed;
        }
        self.smooth_state = smoothed;
    }

    /// Finds regions where energy rises above its smoothed envelope and maps
    /// each region's energy-weighted centre through `map`. Peaks whose output
    /// is not finite or not above the previous peak's are dropped, so the
    /// kept peaks are monotone.
    pub fn find_peaks(&mut self, map: &FrequencyMap, fft_samples: usize) {
        self.peaks.clear();
        let n = fft_samples as f32;
        let mut start = 0;
        while start < self.bands {
            if self.energy[start] <= self.smoothed[start] {
                start += 1;
                continue;
            }
            let mut end = start;
            let mut bin_sum = 0.0;
            let mut energy_sum = 0.0;
            while end < self.bands && self.energy[end] > self.smoothed[end] {
                bin_sum += end as f32 * self.energy[end];
                energy_sum += self.energy[end];
                end += 1;
            }
            start = end;

            let input = bin_sum / energy_sum;
            let output = map.map(input / n) * n;
            if !input.is_finite() || !output.is_finite() {
                continue;
            }
            if self.peaks.last().is_some_and(|last| output <= last.output) {
                continue;
            }
            self.peaks.push(Peak { input, output });
        }
    }

    /// Rebuilds the output map from the current peaks. Between peaks the
    /// input position follows a Hermite curve so each peak lands exactly on
    /// its mapped bin; outside them the offset of the nearest peak is kept.
    pub fn update_output_map(&mut self) {
        let (Some(&first), Some(&last)) = (self.peaks.first(), self.peaks.last()) else {
            self.set_identity();
            return;
        };
        let bands = self.bands;
        let ceil_bin = |x: f32| (x.ceil().max(0.0) as usize).min(bands);

        let bottom_offset = first.input - first.output;
        for b in 0..ceil_bin(first.output) {
            self.output_map[b] = MapPoint {
                input_bin: b as f32 + bottom_offset,
                freq_grad: 1.0,
            };
        }

        for pair in self.peaks.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let range_scale = 1.0 / (next.output - prev.output);
            let out_offset = prev.input - prev.output;
            let out_scale = (next.input - next.output) - out_offset;
            let grad_scale = out_scale * range_scale;
            for b in ceil_bin(prev.output)..ceil_bin(next.output) {
                let r = (b as f32 - prev.output) * range_scale;
                let h = r * r * (3.0 - 2.0 * r);
                let grad_h = 6.0 * r * (1.0 - r);
                self.output_map[b] = MapPoint {
                    input_bin: b as f32 + out_offset + out_scale * h,
                    freq_grad: 1.0 + grad_scale * grad_h,
                };
            }
        }

        let top_offset = last.input - last.output;
        for b in ceil_bin(last.output)..bands {
            self.output_map[b] = MapPoint {
                input_bin: b as f32 + top_offset,
                freq_grad: 1.0,
            };
        }
    }

    #[inline]
    pub fn point(&self, bin: usize) -> MapPoint {
        self.output_map[bin]
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }

    /// Summed energy from the last smoothing pass.
    pub fn energy(&self) -> &[f32] {
        &self.energy
    }
}

/// Splits a fractional bin position into `(low, high, frac)` for linear
/// interpolation, or `None` outside `[0, bands - 1]`.
#[inline]
pub(crate) fn fractional_bin(position: f32, bands: usize) -> Option<(usize, usize, f32)> {
    let top = (bands - 1) as f32;
    if !(0.0..=top).contains(&position) {
        return None;
    }
    let low = position.floor() as usize;
    let high = (low + 1).min(bands - 1);
    Some((low, high, position - low as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sanitize_factor() {
        assert_eq!(sanitize_factor(0.0), 1.0);
        assert_eq!(sanitize_factor(f32::NAN), 1.0);
        assert_eq!(sanitize_factor(f32::INFINITY), 1.0);
        assert_eq!(sanitize_factor(-2.0), 0.5);
        assert_eq!(sanitize_factor(-0.5), 2.0);
        assert_eq!(sanitize_factor(-1.0), 1.0);
        assert_eq!(sanitize_factor(-1000.0), MIN_FACTOR);
        assert_eq!(sanitize_factor(1000.0), MAX_FACTOR);
        assert_eq!(sanitize_factor(1e-6), MIN_FACTOR);
        assert_abs_diff_eq!(semitones_to_factor(12.0), 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(semitones_to_factor(-12.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_tonality_limit_shifts_upper_band() {
        let mut map = FrequencyMap::default();
        assert!(!map.is_mapped());
        map.set_transpose(2.0, 0.1);
        assert!(map.is_mapped());
        assert_abs_diff_eq!(map.map(0.05), 0.1);
        // Above the limit: shifted by (factor - 1) * limit
        assert_abs_diff_eq!(map.map(0.2), 0.3);
        // Continuous at the limit
        assert_abs_diff_eq!(map.map(0.1), 0.2);

        map.set_transpose(2.0, 0.0);
        assert_eq!(map.tonality_limit(), f32::INFINITY);
        assert_abs_diff_eq!(map.map(0.4), 0.8);
        map.set_transpose(2.0, f32::NAN);
        assert_eq!(map.tonality_limit(), f32::INFINITY);
    }

    #[test]
    fn test_custom_map_overrides_and_transpose_clears_it() {
        let mut map = FrequencyMap::default();
        map.set_custom(Box::new(|f| f + 0.01));
        assert!(map.is_mapped());
        assert_abs_diff_eq!(map.map(0.1), 0.11);
        map.set_transpose(1.0, 0.0);
        assert!(!map.has_custom());
        assert!(!map.is_mapped());
        assert!(format!("{map:?}").contains("custom: false"));
    }

    fn two_peak_energy(bands: usize) -> Vec<f32> {
        let mut energy = vec![0.0; bands];
        for (centre, height) in [(20usize, 100.0f32), (60, 50.0)] {
            energy[centre - 1] = height * 0.5;
            energy[centre] = height;
            energy[centre + 1] = height * 0.5;
        }
        energy
    }

    fn smoothed_map(energy: &[f32], bands: usize) -> SpectralMap {
        let mut spectral = SpectralMap::new(bands);
        for step in 0..SMOOTH_STEPS {
            spectral.smooth_step(step, energy, 8.0);
        }
        spectral
    }

    #[test]
    fn test_find_peaks_locates_energy_centres() {
        let bands = 129;
        let energy = two_peak_energy(bands);
        let mut spectral = smoothed_map(&energy, bands);
        let mut map = FrequencyMap::default();
        map.set_transpose(1.5, 0.0);
        spectral.find_peaks(&map, 256);
        assert_eq!(spectral.peak_count(), 2);
        spectral.update_output_map();
        // Output bin 30 reads from peak input bin 20, 90 from 60
        assert_abs_diff_eq!(spectral.point(30).input_bin, 20.0, epsilon = 1e-3);
        assert_abs_diff_eq!(spectral.point(90).input_bin, 60.0, epsilon = 1e-3);
        // Map is monotone
        for b in 1..bands {
            assert!(spectral.point(b).input_bin > spectral.point(b - 1).input_bin);
        }
    }

    #[test]
    fn test_identity_map_without_peaks() {
        let bands = 33;
        let mut spectral = smoothed_map(&vec![0.0; bands], bands);
        spectral.find_peaks(&FrequencyMap::default(), 64);
        assert_eq!(spectral.peak_count(), 0);
        spectral.update_output_map();
        for b in 0..bands {
            assert_eq!(
                spectral.point(b),
                MapPoint {
                    input_bin: b as f32,
                    freq_grad: 1.0
                }
            );
        }
    }

    #[test]
    fn test_non_monotone_custom_map_drops_peaks() {
        let bands = 129;
        let energy = two_peak_energy(bands);
        let mut spectral = smoothed_map(&energy, bands);
        let mut map = FrequencyMap::default();
        // Folds the spectrum: the higher peak would land below the lower one
        map.set_custom(Box::new(|f| 0.5 - f));
        spectral.find_peaks(&map, 256);
        assert_eq!(spectral.peak_count(), 1);

        map.set_custom(Box::new(|_| f32::NAN));
        spectral.find_peaks(&map, 256);
        assert_eq!(spectral.peak_count(), 0);
    }

    #[test]
    fn test_smoothing_sums_channels() {
        let bands = 8;
        let mut energy = vec![1.0; bands * 2];
        energy[bands + 3] = 5.0;
        let mut spectral = SpectralMap::new(bands);
        spectral.smooth_step(0, &energy, 2.0);
        assert_eq!(spectral.energy()[0], 2.0);
        assert_eq!(spectral.energy()[3], 6.0);
    }

    #[test]
    fn test_fractional_bin() {
        assert_eq!(fractional_bin(2.25, 5), Some((2, 3, 0.25)));
        assert_eq!(fractional_bin(4.0, 5), Some((4, 4, 0.0)));
        assert_eq!(fractional_bin(-0.5, 5), None);
        assert_eq!(fractional_bin(4.5, 5), None);
        assert_eq!(fractional_bin(f32::NAN, 5), None);
    }
}
