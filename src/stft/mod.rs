//! Short-time Fourier transform with block-synchronous analysis and
//! overlap-add synthesis.
//!
//! Input is written into a per-channel history ring; [`Stft::analyse`]
//! windows the most recent block (optionally further in the past), rotates it
//! so the window's centre of mass sits at time zero, and stores
//! `fft_samples / 2 + 1` bins per channel. [`Stft::synthesise`] inverts the
//! spectra, applies the synthesis window and adds the result into the output
//! accumulator at the read cursor. Analysis and synthesis windows are built so
//! that an unmodified spectrum reproduces the input delayed by
//! [`Stft::latency`].
//!
//! Both transforms can also be run as a sequence of steps so that callers can
//! spread one block's work over many audio callbacks.

mod buffers;

pub use buffers::{ChannelRings, InputHistory, OutputAccumulator};

use std::f32::consts::PI;

use log::debug;
use rustfft::num_complex::Complex;

use crate::core::fft::{Fft, COMPLEX_ZERO, WINDOW_SUM_EPSILON, WINDOW_SUM_FLOOR_RATIO};
use crate::core::window::{
    cola_ripple, generate_window, product_centre, synthesis_window, WindowShape,
};
use crate::error::StretchError;

/// STFT configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StftConfig {
    pub analysis_channels: usize,
    pub synthesis_channels: usize,
    pub block_samples: usize,
    /// History kept beyond one block, for analysing frames in the past.
    pub extra_input_history: usize,
    pub interval_samples: usize,
    /// Window asymmetry in `[-1, 1]`.
    pub asymmetry: f32,
    /// Window shape; `None` picks a Kaiser window suited to the overlap.
    pub shape: Option<WindowShape>,
    /// Split each transform into its radix-2 stages.
    pub split_computation: bool,
}

impl StftConfig {
    pub fn new(channels: usize, block_samples: usize, interval_samples: usize) -> Self {
        Self {
            analysis_channels: channels,
            synthesis_channels: channels,
            block_samples,
            extra_input_history: 0,
            interval_samples,
            asymmetry: 0.0,
            shape: None,
            split_computation: false,
        }
    }

    pub fn with_synthesis_channels(mut self, channels: usize) -> Self {
        self.synthesis_channels = channels;
        self
    }

    pub fn with_extra_input_history(mut self, samples: usize) -> Self {
        self.extra_input_history = samples;
        self
    }

    pub fn with_asymmetry(mut self, asymmetry: f32) -> Self {
        self.asymmetry = asymmetry;
        self
    }

    pub fn with_shape(mut self, shape: WindowShape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_split_computation(mut self, split: bool) -> Self {
        self.split_computation = split;
        self
    }
}

/// Windowed, overlapped STFT with input history and output accumulator.
pub struct Stft {
    fft: Fft,
    analysis_channels: usize,
    synthesis_channels: usize,
    block_samples: usize,
    interval_samples: usize,
    bands: usize,
    split_computation: bool,
    analysis_window: Vec<f32>,
    synthesis_window: Vec<f32>,
    /// Frame reference within the block (analysis × synthesis centre of mass).
    offset: usize,
    input: InputHistory,
    output: OutputAccumulator,
    /// Flat `channel * bands + bin` spectra.
    spectra: Vec<Complex<f32>>,
    time_buffer: Vec<Complex<f32>>,
    fft_work: Vec<Complex<f32>>,
    block_buffer: Vec<f32>,
    samples_since_analysis: usize,
    /// Start of the newest synthesised frame relative to the output cursor.
    newest_frame: isize,
    /// Where the next synthesised frame starts, relative to the output cursor.
    synthesis_offset: usize,
}

impl Stft {
    /// Creates and sizes an STFT.
    ///
    /// # Errors
    /// Returns a configuration error for zero channels, blocks shorter than two
    /// samples, or an interval that is zero or longer than the block.
    pub fn new(config: StftConfig) -> Result<Self, StretchError> {
        if config.analysis_channels == 0 || config.synthesis_channels == 0 {
            return Err(StretchError::InvalidChannels(0));
        }
        if config.block_samples < 2 {
            return Err(StretchError::InvalidBlockSize(config.block_samples));
        }
        validate_interval(config.interval_samples, config.block_samples)?;

        let block = config.block_samples;
        let fft_samples = block.next_power_of_two();
        let fft = Fft::new(fft_samples)?;
        let bands = fft_samples / 2 + 1;
        let spectrum_channels = config.analysis_channels.max(config.synthesis_channels);

        let mut stft = Self {
            fft,
            analysis_channels: config.analysis_channels,
            synthesis_channels: config.synthesis_channels,
            block_samples: block,
            interval_samples: config.interval_samples,
            bands,
            split_computation: config.split_computation,
            analysis_window: Vec::new(),
            synthesis_window: Vec::new(),
            offset: block / 2,
            input: InputHistory::new(
                config.analysis_channels,
                block + config.extra_input_history,
            ),
            output: OutputAccumulator::new(config.synthesis_channels, 2 * block),
            spectra: vec![COMPLEX_ZERO; spectrum_channels * bands],
            time_buffer: vec![COMPLEX_ZERO; fft_samples],
            fft_work: vec![COMPLEX_ZERO; fft_samples],
            block_buffer: vec![0.0; block],
            samples_since_analysis: 0,
            newest_frame: -(block as isize),
            synthesis_offset: 0,
        };
        let shape = config
            .shape
            .unwrap_or_else(|| WindowShape::for_overlap(block as f32 / config.interval_samples as f32));
        stft.set_interval(config.interval_samples, shape, config.asymmetry)?;
        Ok(stft)
    }

    /// Regenerates the windows for a new interval, shape and asymmetry.
    ///
    /// Latencies follow the new window's centre of mass. On error nothing
    /// changes.
    pub fn set_interval(
        &mut self,
        interval: usize,
        shape: WindowShape,
        asymmetry: f32,
    ) -> Result<(), StretchError> {
        validate_interval(interval, self.block_samples)?;
        let analysis = generate_window(shape, asymmetry, self.block_samples)?;
        let synthesis = synthesis_window(&analysis, interval);
        self.offset = product_centre(&analysis, &synthesis);
        debug!(
            "stft windows: block {}, fft {}, interval {}, {:?}, asymmetry {:.2}, offset {}, cola ripple {:.2e}",
            self.block_samples,
            self.fft.size(),
            interval,
            shape,
            asymmetry,
            self.offset,
            cola_ripple(&analysis, &synthesis, interval)
        );
        self.analysis_window = analysis;
        self.synthesis_window = synthesis;
        self.interval_samples = interval;
        Ok(())
    }

    /// Clears input history, spectra and pending output.
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.spectra.fill(COMPLEX_ZERO);
        self.samples_since_analysis = 0;
        self.newest_frame = -(self.block_samples as isize);
        self.synthesis_offset = 0;
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    pub fn fft_samples(&self) -> usize {
        self.fft.size()
    }

    pub fn default_interval(&self) -> usize {
        self.interval_samples
    }

    /// Number of bins per channel: `fft_samples / 2 + 1`.
    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn analysis_channels(&self) -> usize {
        self.analysis_channels
    }

    pub fn synthesis_channels(&self) -> usize {
        self.synthesis_channels
    }

    pub fn analysis_window(&self) -> &[f32] {
        &self.analysis_window
    }

    pub fn synthesis_window(&self) -> &[f32] {
        &self.synthesis_window
    }

    /// Normalised frequency (cycles per sample) at the centre of a bin.
    #[inline]
    pub fn bin_to_freq(&self, bin: f32) -> f32 {
        bin / self.fft.size() as f32
    }

    #[inline]
    pub fn freq_to_bin(&self, freq: f32) -> f32 {
        freq * self.fft.size() as f32
    }

    /// Samples between the newest input and the analysed frame reference.
    pub fn analysis_latency(&self) -> usize {
        self.block_samples - self.offset
    }

    /// Samples between the read cursor and a fresh frame's reference.
    pub fn synthesis_latency(&self) -> usize {
        self.offset
    }

    /// Total delay of an unmodified round trip.
    pub fn latency(&self) -> usize {
        self.analysis_latency() + self.synthesis_latency()
    }

    // ---- input ----

    /// Writes samples for `channel` starting `offset` samples ahead of the
    /// input cursor.
    pub fn write_input(&mut self, channel: usize, offset: usize, samples: &[f32]) {
        self.input.write(channel, offset as isize, samples);
    }

    /// Moves the input cursor forward. With `clear_moved_region` the samples
    /// passed over become silence.
    pub fn move_input(&mut self, samples: usize, clear_moved_region: bool) {
        self.input.advance(samples, clear_moved_region);
        self.samples_since_analysis += samples;
    }

    pub fn samples_since_analysis(&self) -> usize {
        self.samples_since_analysis
    }

    pub fn input(&self) -> &InputHistory {
        &self.input
    }

    /// Exchanges the input history with `other`, which must have been cloned
    /// from [`Stft::input`].
    pub fn swap_input(&mut self, other: &mut InputHistory) {
        std::mem::swap(&mut self.input, other);
    }

    // ---- analysis ----

    fn channel_steps(&self) -> usize {
        let fft_steps = if self.split_computation {
            self.fft.steps()
        } else {
            1
        };
        fft_steps + 2
    }

    /// Number of calls to [`Stft::analyse_step`] that make up one analysis.
    pub fn analyse_steps(&self) -> usize {
        self.analysis_channels * self.channel_steps()
    }

    /// Analyses the block ending `samples_in_past` samples before the input
    /// cursor.
    pub fn analyse(&mut self, samples_in_past: usize) {
        for step in 0..self.analyse_steps() {
            self.analyse_step(step, samples_in_past);
        }
    }

    /// Runs one analysis step. Steps must run in order with the same
    /// `samples_in_past`.
    pub fn analyse_step(&mut self, step: usize, samples_in_past: usize) {
        let per_channel = self.channel_steps();
        let channel = step / per_channel;
        let sub = step % per_channel;
        if sub == 0 {
            if channel == 0 {
                self.samples_since_analysis = samples_in_past;
            }
            self.load_frame(channel, samples_in_past);
        } else if sub + 1 < per_channel {
            self.transform_step(sub - 1, false);
        } else {
            let bands = self.bands;
            self.spectra[channel * bands..(channel + 1) * bands]
                .copy_from_slice(&self.fft_work[..bands]);
        }
    }

    fn load_frame(&mut self, channel: usize, samples_in_past: usize) {
        let n = self.fft.size();
        let start = -((samples_in_past + self.block_samples) as isize);
        debug_assert!(
            samples_in_past + self.block_samples <= self.input.capacity(),
            "analysis reaches {samples_in_past} samples past the kept history"
        );
        self.input.read(channel, start, &mut self.block_buffer);
        self.time_buffer.fill(COMPLEX_ZERO);
        for (j, (&x, &w)) in self
            .block_buffer
            .iter()
            .zip(self.analysis_window.iter())
            .enumerate()
        {
            self.time_buffer[(j + n - self.offset) % n] = Complex::new(x * w, 0.0);
        }
    }

    fn transform_step(&mut self, fft_step: usize, inverse: bool) {
        match (self.split_computation, inverse) {
            (true, false) => self.fft.fft_step(fft_step, &self.time_buffer, &mut self.fft_work),
            (true, true) => self.fft.ifft_step(fft_step, &self.time_buffer, &mut self.fft_work),
            (false, false) => self.fft.fft(&self.time_buffer, &mut self.fft_work),
            (false, true) => self.fft.ifft(&self.time_buffer, &mut self.fft_work),
        }
    }

    // ---- spectra ----

    pub fn spectrum(&self, channel: usize) -> &[Complex<f32>] {
        &self.spectra[channel * self.bands..(channel + 1) * self.bands]
    }

    pub fn spectrum_mut(&mut self, channel: usize) -> &mut [Complex<f32>] {
        &mut self.spectra[channel * self.bands..(channel + 1) * self.bands]
    }

    // ---- synthesis ----

    /// Number of calls to [`Stft::synthesise_step`] that make up one synthesis.
    pub fn synthesise_steps(&self) -> usize {
        self.synthesis_channels * self.channel_steps()
    }

    /// Inverts every channel's spectrum and overlap-adds it at the read cursor.
    pub fn synthesise(&mut self) {
        for step in 0..self.synthesise_steps() {
            self.synthesise_step(step);
        }
    }

    /// Runs one synthesis step. Steps must run in order.
    pub fn synthesise_step(&mut self, step: usize) {
        let per_channel = self.channel_steps();
        let channel = step / per_channel;
        let sub = step % per_channel;
        if sub == 0 {
            if channel == 0 {
                self.newest_frame = self.synthesis_offset as isize;
            }
            self.load_spectrum(channel);
        } else if sub + 1 < per_channel {
            self.transform_step(sub - 1, true);
        } else {
            let n = self.fft.size();
            for (j, (slot, &w)) in self
                .block_buffer
                .iter_mut()
                .zip(self.synthesis_window.iter())
                .enumerate()
            {
                *slot = self.fft_work[(j + n - self.offset) % n].re * w;
            }
            self.output
                .add(channel, self.synthesis_offset as isize, &self.block_buffer);
        }
    }

    /// Expands one channel's half spectrum into a Hermitian full spectrum.
    fn load_spectrum(&mut self, channel: usize) {
        let n = self.fft.size();
        let bands = self.bands;
        let spectrum = &self.spectra[channel * bands..(channel + 1) * bands];
        self.time_buffer[0] = Complex::new(spectrum[0].re, 0.0);
        for b in 1..bands - 1 {
            self.time_buffer[b] = spectrum[b];
            self.time_buffer[n - b] = spectrum[b].conj();
        }
        self.time_buffer[n / 2] = Complex::new(spectrum[bands - 1].re, 0.0);
    }

    // ---- output ----

    pub fn read_output(&self, channel: usize, offset: usize, out: &mut [f32]) {
        self.output.read(channel, offset as isize, out);
    }

    #[inline]
    pub fn output_sample(&self, channel: usize, offset: usize) -> f32 {
        self.output.get(channel, offset as isize)
    }

    pub fn add_output(&mut self, channel: usize, offset: usize, samples: &[f32]) {
        self.output.add(channel, offset as isize, samples);
    }

    pub fn replace_output(&mut self, channel: usize, offset: usize, samples: &[f32]) {
        self.output.write(channel, offset as isize, samples);
    }

    /// Consumes `samples` of output, clearing them for future overlap-adds.
    pub fn move_output(&mut self, samples: usize) {
        self.output.advance(samples, true);
        self.newest_frame -= samples as isize;
        self.synthesis_offset = self.synthesis_offset.saturating_sub(samples);
    }

    /// Output samples consumed since the newest frame started; zero while
    /// that frame still lies ahead of the cursor.
    pub fn samples_since_synthesis(&self) -> usize {
        (-self.newest_frame).max(0) as usize
    }

    /// Places the next synthesised frame `offset` samples ahead of the output
    /// cursor. The offset shrinks as output is consumed, so the frame lands
    /// at a fixed position however late the synthesis runs.
    ///
    /// # Panics
    /// Panics if a frame at `offset` would not fit in the accumulator.
    pub fn set_synthesis_offset(&mut self, offset: usize) {
        assert!(
            offset + self.block_samples <= self.output.capacity(),
            "synthesis offset {offset} exceeds the output accumulator"
        );
        self.synthesis_offset = offset;
    }

    /// Prepares the pending output for the end of a stream.
    ///
    /// From `offset` to the end of the synthesised data, the output is
    /// normalised for the overlap of frames that will never arrive and faded
    /// to zero with a raised cosine. `strength` blends between the untouched
    /// output (0) and the fully tapered one (1).
    pub fn finish_output(&mut self, strength: f32, offset: usize) {
        let strength = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let block = self.block_samples as isize;
        let end = (self.newest_frame + block).max(0) as usize;
        if strength == 0.0 || offset >= end {
            return;
        }
        let interval = self.interval_samples as isize;
        let span = (end - offset) as f32;
        for j in offset..end {
            let mut coverage = 0.0f32;
            let mut index = j as isize - self.newest_frame;
            while index < 0 {
                index += interval;
            }
            while index < block {
                let i = index as usize;
                coverage += self.analysis_window[i] * self.synthesis_window[i];
                index += interval;
            }
            let norm = 1.0 / coverage.max(WINDOW_SUM_FLOOR_RATIO).max(WINDOW_SUM_EPSILON);
            let fade = 0.5 + 0.5 * (PI * (j - offset) as f32 / span).cos();
            let gain = (1.0 - strength) + strength * norm * fade;
            for channel in 0..self.synthesis_channels {
                self.output.scale(channel, j as isize, gain);
            }
        }
    }
}

fn validate_interval(interval: usize, block: usize) -> Result<(), StretchError> {
    if interval == 0 || interval > block {
        return Err(StretchError::InvalidInterval { interval, block });
    }
    Ok(())
}
