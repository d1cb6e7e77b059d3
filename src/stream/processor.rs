use log::debug;

use crate::core::types::StretchParams;
use crate::error::StretchError;
use crate::stretch::engine::Stretch;

/// Smoothing applied to ratio changes once per processed chunk.
const RATIO_SMOOTHING: f64 = 0.1;
/// Ratio difference below which the current ratio snaps to the target.
const RATIO_SNAP: f64 = 1e-4;

/// Streaming chunk-based processor for real-time time stretching.
///
/// Wraps a [`Stretch`] engine and sizes each call's output from the current
/// stretch ratio, so a chunk of `n` input frames yields about `n * ratio`
/// output frames. The fractional part is carried to the next chunk, so the
/// total output tracks the total input exactly.
pub struct StreamProcessor {
    params: StretchParams,
    engine: Stretch,
    /// Current stretch ratio (can be changed on the fly).
    current_ratio: f64,
    /// Target stretch ratio (for smooth interpolation).
    target_ratio: f64,
    /// Output frames owed from previous chunks, in `[0, 1)`.
    remainder: f64,
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("params", &self.params)
            .field("current_ratio", &self.current_ratio)
            .field("target_ratio", &self.target_ratio)
            .field("remainder", &self.remainder)
            .finish_non_exhaustive()
    }
}

impl StreamProcessor {
    /// Creates a new streaming processor.
    ///
    /// # Errors
    /// Returns an error if `params` fail validation.
    pub fn new(params: StretchParams) -> Result<Self, StretchError> {
        params.validate()?;
        let config = params.to_config()?;
        let mut engine = Stretch::new();
        engine.configure_with(&config)?;
        engine.set_transpose_semitones(params.transpose_semitones, params.tonality_limit);
        let ratio = params.stretch_ratio;
        Ok(Self {
            params,
            engine,
            current_ratio: ratio,
            target_ratio: ratio,
            remainder: 0.0,
        })
    }

    /// Processes a chunk of interleaved audio samples.
    ///
    /// # Errors
    /// Returns `StretchError::InvalidInput` if `input` is not a whole number
    /// of frames.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, StretchError> {
        let mut output = Vec::new();
        self.process_into(input, &mut output)?;
        Ok(output)
    }

    /// Like [`StreamProcessor::process`], writing into `output` (cleared
    /// first). Does not allocate once `output` has grown to the largest
    /// chunk size.
    pub fn process_into(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), StretchError> {
        let channels = self.params.channels;
        if input.len() % channels != 0 {
            return Err(StretchError::InvalidInput(format!(
                "{} samples is not a whole number of {channels}-channel frames",
                input.len()
            )));
        }
        self.interpolate_ratio();

        let input_frames = input.len() / channels;
        let exact = input_frames as f64 * self.current_ratio + self.remainder;
        let output_frames = exact.floor() as usize;
        self.remainder = exact - output_frames as f64;

        output.clear();
        output.resize(output_frames * channels, 0.0);
        self.engine
            .process_frames(input, input_frames, output, output_frames);
        Ok(())
    }

    /// Changes the stretch ratio for subsequent processing.
    ///
    /// The ratio change is interpolated smoothly to avoid clicks.
    ///
    /// # Errors
    /// Returns `StretchError::InvalidStretchRatio` if `ratio` is not positive
    /// and finite; the target is left unchanged.
    pub fn set_stretch_ratio(&mut self, ratio: f64) -> Result<(), StretchError> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(StretchError::InvalidStretchRatio(ratio));
        }
        self.target_ratio = ratio;
        Ok(())
    }

    /// Returns the current effective stretch ratio.
    pub fn current_stretch_ratio(&self) -> f64 {
        self.current_ratio
    }

    /// Returns the processing latency in samples per channel.
    pub fn latency_samples(&self) -> usize {
        self.engine.input_latency() + self.engine.output_latency()
    }

    /// Returns the processing latency in seconds.
    pub fn latency_secs(&self) -> f64 {
        self.latency_samples() as f64 / self.params.sample_rate as f64
    }

    /// Resets the engine and returns to the configured ratio.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.current_ratio = self.params.stretch_ratio;
        self.target_ratio = self.params.stretch_ratio;
        self.remainder = 0.0;
    }

    /// Drains the audio still inside the engine and resets it.
    pub fn flush(&mut self) -> Result<Vec<f32>, StretchError> {
        let channels = self.params.channels;
        let pending = self.engine.input_latency() as f64 * self.current_ratio + self.remainder;
        let frames = pending.round() as usize + self.engine.output_latency();
        debug!("stream flush: {} frames at ratio {:.3}", frames, self.current_ratio);
        let mut output = vec![0.0; frames * channels];
        self.engine
            .flush_frames(&mut output, frames, (1.0 / self.current_ratio) as f32);
        self.remainder = 0.0;
        Ok(output)
    }

    /// The wrapped engine, for transpose and formant control.
    pub fn engine_mut(&mut self) -> &mut Stretch {
        &mut self.engine
    }

    /// Smoothly interpolates between current and target ratio.
    fn interpolate_ratio(&mut self) {
        self.current_ratio += RATIO_SMOOTHING * (self.target_ratio - self.current_ratio);

        // Snap when close enough
        if (self.current_ratio - self.target_ratio).abs() < RATIO_SNAP {
            self.current_ratio = self.target_ratio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn small_params(ratio: f64) -> StretchParams {
        StretchParams::new(ratio)
            .unwrap()
            .with_sample_rate(44100)
            .with_block_samples(1024)
            .with_interval_samples(256)
    }

    #[test]
    fn test_stream_processor_basic() {
        let mut proc = StreamProcessor::new(small_params(1.0)).unwrap();

        // Generate a test signal
        let chunk_size = 4096;
        let signal: Vec<f32> = (0..chunk_size * 4)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();

        let mut total_output = Vec::new();
        for chunk in signal.chunks(chunk_size) {
            let output = proc.process(chunk).unwrap();
            assert_eq!(output.len(), chunk.len());
            total_output.extend_from_slice(&output);
        }
        let remaining = proc.flush().unwrap();
        assert_eq!(remaining.len(), proc.latency_samples());
        total_output.extend_from_slice(&remaining);

        let peak = total_output.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(peak > 0.5, "expected audible output, peak {peak}");
    }

    #[test]
    fn test_stream_processor_carries_fraction() {
        let mut proc = StreamProcessor::new(small_params(1.5)).unwrap();
        let chunk = vec![0.0f32; 333];
        let total: usize = (0..10).map(|_| proc.process(&chunk).unwrap().len()).sum();
        assert_eq!(total, (3330.0f64 * 1.5).floor() as usize);
    }

    #[test]
    fn test_stream_processor_ratio_change() {
        let mut proc = StreamProcessor::new(small_params(1.0)).unwrap();
        assert!((proc.current_stretch_ratio() - 1.0).abs() < 1e-6);

        proc.set_stretch_ratio(1.05).unwrap();
        assert!(proc.set_stretch_ratio(0.0).is_err());
        // After a few interpolation steps, ratio should change
        for _ in 0..100 {
            proc.interpolate_ratio();
        }
        assert!((proc.current_stretch_ratio() - 1.05).abs() < 0.01);
    }

    #[test]
    fn test_stream_processor_latency() {
        let proc = StreamProcessor::new(small_params(1.0)).unwrap();
        assert_eq!(proc.latency_samples(), 1024);
        assert!((proc.latency_secs() - 1024.0 / 44100.0).abs() < 1e-6);
    }

    #[test]
    fn test_stream_processor_rejects_partial_frames() {
        let mut proc = StreamProcessor::new(small_params(1.0).with_channels(2)).unwrap();
        assert!(matches!(
            proc.process(&[0.0; 3]),
            Err(StretchError::InvalidInput(_))
        ));
        assert_eq!(proc.process(&[0.0; 4]).unwrap().len(), 4);
    }

    #[test]
    fn test_stream_processor_reset() {
        let mut proc = StreamProcessor::new(small_params(1.5)).unwrap();
        proc.set_stretch_ratio(2.0).unwrap();
        proc.process(&[0.0; 100]).unwrap();
        proc.reset();

        assert!((proc.current_stretch_ratio() - 1.5).abs() < 1e-6);
        assert_eq!(proc.engine_mut().state(), crate::EngineState::Configured);
    }
}
