//! Error types for the phasestretch crate.

use thiserror::Error;

/// Errors reported by configuration and the one-shot helpers.
///
/// Processing never fails: running short of input is handled by emitting
/// silence, and calling a processing method on an unconfigured engine is a
/// contract violation that panics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StretchError {
    /// At least one channel is required.
    #[error("invalid channel count: {0}. Must be at least 1.")]
    InvalidChannels(usize),
    /// Blocks must hold at least two samples.
    #[error("invalid block size: {0} samples. Must be at least 2.")]
    InvalidBlockSize(usize),
    /// The interval must be non-zero and no longer than the block.
    #[error("invalid interval: {interval} samples for a {block}-sample block")]
    InvalidInterval { interval: usize, block: usize },
    /// Sample rate must be positive and finite.
    #[error("invalid sample rate: {0}. Must be positive and finite.")]
    InvalidSampleRate(f32),
    /// FFT sizes must be non-zero with no prime factors beyond 2, 3 and 5.
    #[error("unsupported FFT size: {0}")]
    UnsupportedFftSize(usize),
    /// Windows need at least two samples.
    #[error("invalid window length: {0}. Must be at least 2.")]
    InvalidWindowLength(usize),
    /// Stretch ratio must be positive and finite.
    #[error("invalid stretch ratio: {0}. Must be positive and finite.")]
    InvalidStretchRatio(f64),
    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StretchError {
    /// Returns true for errors raised while configuring the engine, the STFT
    /// or one of its kernels.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StretchError::InvalidChannels(_)
                | StretchError::InvalidBlockSize(_)
                | StretchError::InvalidInterval { .. }
                | StretchError::InvalidSampleRate(_)
                | StretchError::UnsupportedFftSize(_)
                | StretchError::InvalidWindowLength(_)
        )
    }
}
