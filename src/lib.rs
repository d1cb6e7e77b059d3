#![forbid(unsafe_code)]
//! Real-time phase-vocoder time stretching and pitch shifting.
//!
//! `phasestretch` runs a windowed, overlapped STFT block by block and
//! resynthesises each block with phases advanced by every bin's measured
//! frequency. Because each [`Stretch::process`] call may take any number of
//! input frames for any number of output frames, the playback rate can change
//! from one audio callback to the next. Transposition (with an optional
//! tonality limit or an arbitrary frequency map) and formant shifting are
//! applied in the same pass.
//!
//! # Quick Start
//!
//! ```
//! use phasestretch::AudioBuffer;
//!
//! // 1 second of 440 Hz sine at 44.1 kHz
//! let input: Vec<f32> = (0..44100)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
//!     .collect();
//! let buffer = AudioBuffer::new(input, 1, 44100).unwrap();
//!
//! let output = phasestretch::stretch(&buffer, 1.5).unwrap();
//! assert_eq!(output.num_frames(), 66150);
//! ```
//!
//! # Real time
//!
//! Configure an engine once, then call it from the audio callback:
//!
//! ```
//! use phasestretch::Stretch;
//!
//! let mut engine = Stretch::new();
//! engine.preset_default(2, 48000.0, false).unwrap();
//! engine.set_transpose_semitones(-2.0, 0.0);
//!
//! let input = vec![0.0f32; 2 * 480];
//! let mut output = vec![0.0f32; 2 * 512];
//! engine.process(&input, &mut output);
//! ```
//!
//! [`StreamProcessor`] wraps the engine for chunked offline-style use with a
//! smoothed stretch ratio.

pub mod core;
pub mod error;
pub mod stft;
pub mod stream;
pub mod stretch;

pub use crate::core::fft::Fft;
pub use crate::core::types::{
    AudioBuffer, AudioInput, AudioOutput, FrameSlice, FrameSliceMut, Interleaved, InterleavedMut,
    Planar, PlanarMut, Preset, Sample, Silence, StretchParams,
};
pub use crate::core::window::WindowShape;
pub use error::StretchError;
pub use stft::{Stft, StftConfig};
pub use stream::StreamProcessor;
pub use stretch::{EngineState, FormantShift, FrequencyMap, Stretch, StretchConfig};

/// Extra silent frames past the output-seek length, so rounding in the
/// playback rate never makes [`Stretch::exact`] reject the input.
const EXACT_MARGIN: usize = 2;

/// Validates that input contains only finite samples.
#[inline]
fn validate_input(input: &[f32]) -> Result<(), StretchError> {
    match input.iter().position(|s| !s.is_finite()) {
        Some(index) => Err(StretchError::InvalidInput(format!(
            "non-finite sample at index {index}"
        ))),
        None => Ok(()),
    }
}

/// Runs `buffer` through a default-preset engine with [`Stretch::exact`],
/// producing `round(frames * ratio)` frames. Input shorter than the
/// output-seek length is padded with silence and the padding trimmed again.
fn run_exact(
    buffer: &AudioBuffer,
    ratio: f64,
    setup: impl FnOnce(&mut Stretch),
) -> Result<AudioBuffer, StretchError> {
    validate_input(&buffer.data)?;
    let channels = buffer.channels;
    let frames = buffer.num_frames();
    let output_frames = (frames as f64 * ratio).round() as usize;
    if frames == 0 || output_frames == 0 {
        return AudioBuffer::new(Vec::new(), channels, buffer.sample_rate);
    }

    let mut engine = Stretch::new();
    engine.preset_default(channels, buffer.sample_rate as f32, false)?;
    setup(&mut engine);

    let seek_length = engine.output_seek_length((1.0 / ratio) as f32);
    let padded_frames = frames.max(seek_length + EXACT_MARGIN);
    let padded_output_frames = ((padded_frames as f64 * ratio).round() as usize).max(output_frames);

    let mut input = vec![0.0; padded_frames * channels];
    input[..frames * channels].copy_from_slice(&buffer.data[..frames * channels]);
    let mut output = vec![0.0; padded_output_frames * channels];
    if !engine.exact(&input, &mut output) {
        return Err(StretchError::InvalidInput(format!(
            "{padded_frames} frames is too short to stretch by {ratio}"
        )));
    }
    output.truncate(output_frames * channels);
    AudioBuffer::new(output, channels, buffer.sample_rate)
}

/// Stretches a whole buffer to `round(frames * ratio)` frames, keeping pitch.
///
/// The output is time-aligned with the input: engine latency is removed and
/// the end of the input lines up with the end of the output.
///
/// # Errors
///
/// Returns [`StretchError::InvalidStretchRatio`] if `ratio` is not positive
/// and finite, [`StretchError::InvalidInput`] for non-finite samples, or a
/// configuration error for an unusable sample rate.
pub fn stretch(buffer: &AudioBuffer, ratio: f64) -> Result<AudioBuffer, StretchError> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(StretchError::InvalidStretchRatio(ratio));
    }
    run_exact(buffer, ratio, |_| {})
}

/// Transposes a whole buffer by `semitones`, keeping its duration.
///
/// # Errors
///
/// Returns [`StretchError::InvalidInput`] if `semitones` or any sample is not
/// finite.
pub fn pitch_shift(buffer: &AudioBuffer, semitones: f32) -> Result<AudioBuffer, StretchError> {
    if !semitones.is_finite() {
        return Err(StretchError::InvalidInput(format!(
            "pitch shift of {semitones} semitones"
        )));
    }
    run_exact(buffer, 1.0, |engine| {
        engine.set_transpose_semitones(semitones, 0.0)
    })
}
