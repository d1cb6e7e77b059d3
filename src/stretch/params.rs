use serde::{Deserialize, Serialize};

use crate::core::types::Preset;
use crate::error::StretchError;

/// Engine configuration derived from user-facing parameters or a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StretchConfig {
    pub channels: usize,
    /// Analysis/synthesis window length. The FFT uses the next power of two.
    pub block_samples: usize,
    /// Output hop between consecutive blocks.
    pub interval_samples: usize,
    /// Spread each block's work over the following interval.
    pub split_computation: bool,
}

impl StretchConfig {
    /// Configuration with explicit block and interval lengths.
    pub fn new(
        channels: usize,
        block_samples: usize,
        interval_samples: usize,
        split_computation: bool,
    ) -> Self {
        Self {
            channels,
            block_samples,
            interval_samples,
            split_computation,
        }
    }

    /// Create a configuration from a preset and sample rate.
    ///
    /// # Errors
    /// Returns an error for a zero channel count or a sample rate that is not
    /// positive and finite.
    pub fn from_preset(
        preset: Preset,
        channels: usize,
        sample_rate: f32,
        split_computation: bool,
    ) -> Result<Self, StretchError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(StretchError::InvalidSampleRate(sample_rate));
        }
        let (block_secs, interval_secs) = match preset {
            Preset::Default => (0.12, 0.03),
            Preset::Cheaper => (0.1, 0.04),
        };
        let block_samples = ((block_secs * sample_rate).round() as usize).max(2);
        let interval_samples = ((interval_secs * sample_rate).round() as usize).clamp(1, block_samples);
        let config = Self::new(channels, block_samples, interval_samples, split_computation);
        config.validate()?;
        Ok(config)
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), StretchError> {
        if self.channels == 0 {
            return Err(StretchError::InvalidChannels(self.channels));
        }
        if self.block_samples < 2 {
            return Err(StretchError::InvalidBlockSize(self.block_samples));
        }
        if self.interval_samples == 0 || self.interval_samples > self.block_samples {
            return Err(StretchError::InvalidInterval {
                interval: self.interval_samples,
                block: self.block_samples,
            });
        }
        Ok(())
    }

    /// Number of blocks overlapping each output sample.
    pub fn overlap(&self) -> f32 {
        self.block_samples as f32 / self.interval_samples.max(1) as f32
    }

    /// FFT length used for this block size.
    pub fn fft_samples(&self) -> usize {
        self.block_samples.next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset_sizes() {
        let config = StretchConfig::from_preset(Preset::Default, 2, 44100.0, false).unwrap();
        assert_eq!(config.block_samples, 5292);
        assert_eq!(config.interval_samples, 1323);
        assert_eq!(config.fft_samples(), 8192);
        assert!((config.overlap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_cheaper_preset_is_cheaper() {
        let default = StretchConfig::from_preset(Preset::Default, 1, 48000.0, false).unwrap();
        let cheaper = StretchConfig::from_preset(Preset::Cheaper, 1, 48000.0, false).unwrap();
        assert!(cheaper.block_samples < default.block_samples);
        assert!(cheaper.interval_samples > default.interval_samples);
    }

    #[test]
    fn test_preset_rejects_bad_inputs() {
        assert!(StretchConfig::from_preset(Preset::Default, 0, 44100.0, false).is_err());
        assert!(StretchConfig::from_preset(Preset::Default, 1, 0.0, false).is_err());
        assert!(StretchConfig::from_preset(Preset::Default, 1, f32::NAN, false).is_err());
        // Tiny sample rates still give a usable block
        let tiny = StretchConfig::from_preset(Preset::Default, 1, 10.0, false).unwrap();
        assert!(tiny.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(StretchConfig::new(1, 1024, 256, false).validate().is_ok());
        assert!(StretchConfig::new(1, 1024, 1024, true).validate().is_ok());
        assert_eq!(
            StretchConfig::new(1, 1, 1, false).validate(),
            Err(StretchError::InvalidBlockSize(1))
        );
        assert!(StretchConfig::new(1, 1024, 0, false).validate().is_err());
        assert!(StretchConfig::new(1, 1024, 1025, false).validate().is_err());
        assert!(StretchConfig::new(0, 1024, 256, false).validate().is_err());
    }
}
