use serde::{Deserialize, Serialize};

use crate::error::StretchError;
use crate::stretch::params::StretchConfig;

/// A single audio sample (32-bit float, range -1.0 to 1.0).
pub type Sample = f32;

/// Read access to a block of multichannel audio.
pub trait AudioInput {
    /// Number of channels.
    fn channels(&self) -> usize;
    /// Number of frames (samples per channel).
    fn frames(&self) -> usize;
    /// Sample at `frame` of `channel`. Both must be in range.
    fn sample(&self, channel: usize, frame: usize) -> Sample;
}

/// Write access to a block of multichannel audio.
pub trait AudioOutput {
    fn channels(&self) -> usize;
    fn frames(&self) -> usize;
    fn sample(&self, channel: usize, frame: usize) -> Sample;
    fn set_sample(&mut self, channel: usize, frame: usize, value: Sample);
}

/// Interleaved input view: `[L0, R0, L1, R1, ...]`.
#[derive(Debug, Clone, Copy)]
pub struct Interleaved<'a> {
    data: &'a [Sample],
    channels: usize,
    frames: usize,
}

impl<'a> Interleaved<'a> {
    /// Views `data` as interleaved frames; a trailing partial frame is ignored.
    pub fn new(data: &'a [Sample], channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            data,
            channels,
            frames: data.len() / channels,
        }
    }

    /// Views the first `frames` frames of `data`.
    ///
    /// # Panics
    /// Panics if `data` holds fewer than `frames * channels` samples.
    pub fn with_frames(data: &'a [Sample], channels: usize, frames: usize) -> Self {
        let channels = channels.max(1);
        assert!(
            data.len() >= frames * channels,
            "interleaved input holds {} samples, {frames} frames of {channels} channels need {}",
            data.len(),
            frames * channels
        );
        Self {
            data,
            channels,
            frames,
        }
    }
}

impl AudioInput for Interleaved<'_> {
    fn channels(&self) -> usize {
        self.channels
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.data[frame * self.channels + channel]
    }
}

/// Interleaved output view.
#[derive(Debug)]
pub struct InterleavedMut<'a> {
    data: &'a mut [Sample],
    channels: usize,
    frames: usize,
}

impl<'a> InterleavedMut<'a> {
    pub fn new(data: &'a mut [Sample], channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        Self {
            data,
            channels,
            frames,
        }
    }

    /// # Panics
    /// Panics if `data` holds fewer than `frames * channels` samples.
    pub fn with_frames(data: &'a mut [Sample], channels: usize, frames: usize) -> Self {
        let channels = channels.max(1);
        assert!(
            data.len() >= frames * channels,
            "interleaved output holds {} samples, {frames} frames of {channels} channels need {}",
            data.len(),
            frames * channels
        );
        Self {
            data,
            channels,
            frames,
        }
    }
}

impl AudioOutput for InterleavedMut<'_> {
    fn channels(&self) -> usize {
        self.channels
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.data[frame * self.channels + channel]
    }
    #[inline]
    fn set_sample(&mut self, channel: usize, frame: usize, value: Sample) {
        self.data[frame * self.channels + channel] = value;
    }
}

/// Planar input view: one slice per channel. Frames = shortest channel.
#[derive(Debug, Clone, Copy)]
pub struct Planar<'a> {
    channels: &'a [&'a [Sample]],
    frames: usize,
}

impl<'a> Planar<'a> {
    pub fn new(channels: &'a [&'a [Sample]]) -> Self {
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        Self { channels, frames }
    }
}

impl AudioInput for Planar<'_> {
    fn channels(&self) -> usize {
        self.channels.len()
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.channels[channel][frame]
    }
}

/// Planar output view.
#[derive(Debug)]
pub struct PlanarMut<'a, 'b> {
    channels: &'a mut [&'b mut [Sample]],
    frames: usize,
}

impl<'a, 'b> PlanarMut<'a, 'b> {
    pub fn new(channels: &'a mut [&'b mut [Sample]]) -> Self {
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        Self { channels, frames }
    }
}

impl AudioOutput for PlanarMut<'_, '_> {
    fn channels(&self) -> usize {
        self.channels.len()
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.channels[channel][frame]
    }
    #[inline]
    fn set_sample(&mut self, channel: usize, frame: usize, value: Sample) {
        self.channels[channel][frame] = value;
    }
}

/// Input of `frames` zero-valued frames, used to drain the engine.
#[derive(Debug, Clone, Copy)]
pub struct Silence {
    pub channels: usize,
    pub frames: usize,
}

impl AudioInput for Silence {
    fn channels(&self) -> usize {
        self.channels
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, _channel: usize, _frame: usize) -> Sample {
        0.0
    }
}

/// A contiguous frame range of another input.
#[derive(Debug)]
pub struct FrameSlice<'a, I: ?Sized> {
    inner: &'a I,
    start: usize,
    frames: usize,
}

impl<'a, I: AudioInput + ?Sized> FrameSlice<'a, I> {
    /// Frames `start..start + frames` of `inner`, clamped to its length.
    pub fn new(inner: &'a I, start: usize, frames: usize) -> Self {
        let start = start.min(inner.frames());
        let frames = frames.min(inner.frames() - start);
        Self {
            inner,
            start,
            frames,
        }
    }
}

impl<I: AudioInput + ?Sized> AudioInput for FrameSlice<'_, I> {
    fn channels(&self) -> usize {
        self.inner.channels()
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.inner.sample(channel, self.start + frame)
    }
}

/// A contiguous frame range of another output.
#[derive(Debug)]
pub struct FrameSliceMut<'a, O: ?Sized> {
    inner: &'a mut O,
    start: usize,
    frames: usize,
}

impl<'a, O: AudioOutput + ?Sized> FrameSliceMut<'a, O> {
    pub fn new(inner: &'a mut O, start: usize, frames: usize) -> Self {
        let start = start.min(inner.frames());
        let frames = frames.min(inner.frames() - start);
        Self {
            inner,
            start,
            frames,
        }
    }
}

impl<O: AudioOutput + ?Sized> AudioOutput for FrameSliceMut<'_, O> {
    fn channels(&self) -> usize {
        self.inner.channels()
    }
    fn frames(&self) -> usize {
        self.frames
    }
    #[inline]
    fn sample(&self, channel: usize, frame: usize) -> Sample {
        self.inner.sample(channel, self.start + frame)
    }
    #[inline]
    fn set_sample(&mut self, channel: usize, frame: usize, value: Sample) {
        self.inner.set_sample(channel, self.start + frame, value);
    }
}

/// Buffer holding audio samples in interleaved format.
///
/// For mono audio, samples are stored sequentially: `[s0, s1, s2, ...]`
/// For stereo audio, samples are interleaved: `[L0, R0, L1, R1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw interleaved sample data.
    pub data: Vec<Sample>,
    /// Number of channels.
    pub channels: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new audio buffer.
    ///
    /// # Errors
    /// Returns `StretchError::InvalidChannels` if channels is 0.
    /// Returns `StretchError::InvalidSampleRate` if sample_rate is 0.
    pub fn new(data: Vec<Sample>, channels: usize, sample_rate: u32) -> Result<Self, StretchError> {
        if channels == 0 {
            return Err(StretchError::InvalidChannels(channels));
        }
        if sample_rate == 0 {
            return Err(StretchError::InvalidSampleRate(sample_rate as f32));
        }
        Ok(Self {
            data,
            channels,
            sample_rate,
        })
    }

    /// Number of frames in the buffer (total samples / channels).
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.channels.max(1)
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    /// Returns true if the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a single channel's data as a new vector.
    pub fn channel_data(&self, channel: usize) -> Vec<Sample> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
            .collect()
    }

    /// Create an `AudioBuffer` from separate channel vectors.
    ///
    /// # Errors
    /// Returns error if channels have different lengths or invalid parameters.
    pub fn from_channels(
        channels_data: &[Vec<Sample>],
        sample_rate: u32,
    ) -> Result<Self, StretchError> {
        if channels_data.is_empty() {
            return Err(StretchError::InvalidChannels(0));
        }
        let num_frames = channels_data[0].len();
        if channels_data.iter().any(|ch| ch.len() != num_frames) {
            return Err(StretchError::InvalidInput(
                "All channels must have the same number of samples".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(num_frames * channels_data.len());
        for i in 0..num_frames {
            for ch in channels_data {
                data.push(ch[i]);
            }
        }
        AudioBuffer::new(data, channels_data.len(), sample_rate)
    }

    /// Interleaved input view over the whole buffer.
    pub fn as_input(&self) -> Interleaved<'_> {
        Interleaved::new(&self.data, self.channels)
    }
}

/// Engine presets trading quality against CPU cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    /// 120 ms blocks every 30 ms.
    #[default]
    Default,
    /// 100 ms blocks every 40 ms: fewer, shorter transforms.
    Cheaper,
}

/// User-facing parameters for [`crate::StreamProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StretchParams {
    /// Stretch ratio: >1.0 = slower (longer), <1.0 = faster (shorter).
    pub stretch_ratio: f64,
    /// Sample rate in Hz (default: 44100).
    pub sample_rate: u32,
    /// Number of audio channels (default: 1).
    pub channels: usize,
    /// Block/interval preset (default: [`Preset::Default`]).
    pub preset: Preset,
    /// Overrides the preset block length.
    pub block_samples: Option<usize>,
    /// Overrides the preset interval.
    pub interval_samples: Option<usize>,
    /// Spread each block's work across the interval (default: false).
    pub split_computation: bool,
    /// Pitch shift in semitones (default: 0).
    pub transpose_semitones: f32,
    /// Normalised frequency above which transposition becomes a shift;
    /// zero or less disables the limit.
    pub tonality_limit: f32,
}

impl StretchParams {
    /// Create new stretch parameters with the given ratio.
    ///
    /// # Errors
    /// Returns `StretchError::InvalidStretchRatio` if ratio is not positive and finite.
    pub fn new(stretch_ratio: f64) -> Result<Self, StretchError> {
        if !stretch_ratio.is_finite() || stretch_ratio <= 0.0 {
            return Err(StretchError::InvalidStretchRatio(stretch_ratio));
        }
        Ok(Self {
            stretch_ratio,
            sample_rate: 44100,
            channels: 1,
            preset: Preset::Default,
            block_samples: None,
            interval_samples: None,
            split_computation: false,
            transpose_semitones: 0.0,
            tonality_limit: 0.0,
        })
    }

    /// Set the preset.
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    /// Set the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the number of channels.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Override the block length.
    pub fn with_block_samples(mut self, block_samples: usize) -> Self {
        self.block_samples = Some(block_samples);
        self
    }

    /// Override the interval.
    pub fn with_interval_samples(mut self, interval_samples: usize) -> Self {
        self.interval_samples = Some(interval_samples);
        self
    }

    pub fn with_split_computation(mut self, split: bool) -> Self {
        self.split_computation = split;
        self
    }

    pub fn with_transpose_semitones(mut self, semitones: f32) -> Self {
        self.transpose_semitones = semitones;
        self
    }

    pub fn with_tonality_limit(mut self, limit: f32) -> Self {
        self.tonality_limit = limit;
        self
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), StretchError> {
        if !self.stretch_ratio.is_finite() || self.stretch_ratio <= 0.0 {
            return Err(StretchError::InvalidStretchRatio(self.stretch_ratio));
        }
        self.to_config().map(|_| ())
    }

    /// Resolves the preset and overrides into an engine configuration.
    pub fn to_config(&self) -> Result<StretchConfig, StretchError> {
        let mut config = StretchConfig::from_preset(
            self.preset,
            self.channels,
            self.sample_rate as f32,
            self.split_computation,
        )?;
        if let Some(block) = self.block_samples {
            config.block_samples = block;
            if self.interval_samples.is_none() {
                config.interval_samples = (block / 4).max(1);
            }
        }
        if let Some(interval) = self.interval_samples {
            config.interval_samples = interval;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_buffer_mono() {
        let buf = AudioBuffer::new(vec![0.1, 0.2, 0.3], 1, 44100).unwrap();
        assert_eq!(buf.num_frames(), 3);
        assert!((buf.duration_secs() - 3.0 / 44100.0).abs() < 1e-10);
    }

    #[test]
    fn test_audio_buffer_invalid() {
        assert!(AudioBuffer::new(vec![0.1], 0, 44100).is_err());
        assert!(AudioBuffer::new(vec![0.1], 1, 0).is_err());
        // More than two channels is fine
        assert!(AudioBuffer::new(vec![0.0; 6], 6, 48000).is_ok());
    }

    #[test]
    fn test_audio_buffer_channel_data() {
        let buf = AudioBuffer::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2, 44100).unwrap();
        assert_eq!(buf.channel_data(0), vec![0.1, 0.3, 0.5]);
        assert_eq!(buf.channel_data(1), vec![0.2, 0.4, 0.6]);
        assert!(buf.channel_data(2).is_empty());
    }

    #[test]
    fn test_audio_buffer_from_channels() {
        let buf = AudioBuffer::from_channels(&[vec![0.1, 0.3], vec![0.2, 0.4]], 44100).unwrap();
        assert_eq!(buf.channels, 2);
        assert_eq!(buf.data, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(AudioBuffer::from_channels(&[vec![0.1], vec![0.2, 0.4]], 44100).is_err());
    }

    #[test]
    fn test_interleaved_and_planar_views_agree() {
        let data = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let interleaved = Interleaved::new(&data, 2);
        let left = [1.0, 2.0, 3.0];
        let right = [-1.0, -2.0, -3.0];
        let chans: [&[f32]; 2] = [&left, &right];
        let planar = Planar::new(&chans);
        assert_eq!(interleaved.frames(), 3);
        assert_eq!(planar.frames(), 3);
        for c in 0..2 {
            for f in 0..3 {
                assert_eq!(interleaved.sample(c, f), planar.sample(c, f));
            }
        }
    }

    #[test]
    fn test_planar_output_view() {
        let mut left = [0.0f32; 4];
        let mut right = [0.0f32; 3];
        {
            let mut chans: [&mut [f32]; 2] = [&mut left, &mut right];
            let mut view = PlanarMut::new(&mut chans);
            assert_eq!(view.channels(), 2);
            // Shortest channel sets the frame count
            assert_eq!(view.frames(), 3);
            view.set_sample(0, 2, 1.5);
            view.set_sample(1, 0, -0.5);
            assert_eq!(view.sample(0, 2), 1.5);
        }
        assert_eq!(left, [0.0, 0.0, 1.5, 0.0]);
        assert_eq!(right, [-0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_frame_slice_clamps() {
        let data = [0.0, 1.0, 2.0, 3.0];
        let input = Interleaved::new(&data, 1);
        let slice = FrameSlice::new(&input, 3, 10);
        assert_eq!(slice.frames(), 1);
        assert_eq!(slice.sample(0, 0), 3.0);

        let mut out = [0.0f32; 4];
        let mut view = InterleavedMut::new(&mut out, 2);
        let mut tail = FrameSliceMut::new(&mut view, 1, 5);
        assert_eq!(tail.frames(), 1);
        tail.set_sample(1, 0, 9.0);
        assert_eq!(out, [0.0, 0.0, 0.0, 9.0]);
    }

    #[test]
    #[should_panic]
    fn test_with_frames_rejects_short_slice() {
        let data = [0.0f32; 3];
        let _ = Interleaved::with_frames(&data, 2, 2);
    }

    #[test]
    fn test_stretch_params_invalid_ratio() {
        assert!(StretchParams::new(0.0).is_err());
        assert!(StretchParams::new(-1.0).is_err());
        assert!(StretchParams::new(f64::NAN).is_err());
        assert!(StretchParams::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_stretch_params_to_config() {
        let params = StretchParams::new(1.5)
            .unwrap()
            .with_sample_rate(48000)
            .with_channels(2);
        let config = params.to_config().unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.block_samples, 5760);
        assert_eq!(config.interval_samples, 1440);

        let config = params
            .clone()
            .with_block_samples(2048)
            .to_config()
            .unwrap();
        assert_eq!(config.interval_samples, 512);

        let bad = params.with_block_samples(256).with_interval_samples(512);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_stretch_params_serde_round_trip() {
        let params = StretchParams::new(0.8)
            .unwrap()
            .with_preset(Preset::Cheaper)
            .with_transpose_semitones(-3.0);
        let json = serde_json::to_string(&params).unwrap();
        let back: StretchParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
