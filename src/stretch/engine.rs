//! The real-time stretch engine.
//!
//! Output is produced one sample at a time. Every `interval` output samples
//! a new block starts: the input position that corresponds to the current
//! output position is analysed, each bin's phase is advanced by its measured
//! frequency (mapped through the active transposition), and the result is
//! overlap-added into the output. The work for a block is an explicit list
//! of steps, so with split computation it can be spread evenly across the
//! interval instead of running all at once.

use std::f64::consts::PI;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;

use crate::core::fft::COMPLEX_ZERO;
use crate::core::types::{
    AudioInput, AudioOutput, FrameSlice, FrameSliceMut, Interleaved, InterleavedMut, Preset,
    Silence,
};
use crate::error::StretchError;
use crate::stft::{InputHistory, Stft, StftConfig};
use crate::stretch::formant::{FormantEnvelope, FormantShift, FORMANT_STEPS};
use crate::stretch::freq_map::{
    fractional_bin, semitones_to_factor, FrequencyMap, SpectralMap, SMOOTH_STEPS,
};
use crate::stretch::params::StretchConfig;
use crate::stretch::phase_vocoder::PhaseVocoder;

/// Input energy per call below which the input counts as silent.
pub const NOISE_FLOOR: f32 = 1e-15;

/// Stretch factor above which non-peak bins get randomised phase.
pub const MAX_CLEAN_STRETCH: f32 = 2.0;

/// Lifecycle of a [`Stretch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No buffers yet; processing panics.
    Unconfigured,
    /// Configured or reset, nothing processed since.
    Configured,
    /// Processing or seeking has pushed the pipeline forward.
    Running,
}

/// Settings that survive reconfiguration.
struct Controls {
    map: FrequencyMap,
    formant: FormantShift,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy)]
struct BlockProcess {
    samples_since_last: usize,
    steps: usize,
    step: usize,
    new_spectrum: bool,
    reanalyse: bool,
    mapped: bool,
    formants: bool,
    time_factor: f32,
    analysis_hop: usize,
}

impl BlockProcess {
    /// No block in flight; the next output sample starts one.
    fn idle() -> Self {
        Self {
            samples_since_last: usize::MAX,
            steps: 0,
            step: 0,
            new_spectrum: false,
            reanalyse: false,
            mapped: false,
            formants: false,
            time_factor: 1.0,
            analysis_hop: 1,
        }
    }
}

/// Everything sized by the configuration.
struct Core {
    config: StretchConfig,
    stft: Stft,
    /// Input as it was when the current block started (split computation).
    stashed_input: InputHistory,
    pv: PhaseVocoder,
    spectral: SpectralMap,
    formant: FormantEnvelope,
    bands: usize,
    /// Flat `channel * bands + bin` working arrays.
    input_bins: Vec<Complex<f32>>,
    energy: Vec<f32>,
    output_bins: Vec<Complex<f32>>,
    output_energy: Vec<f32>,
    input_phase: Vec<f32>,
    mapped_freq: Vec<f64>,
    /// `block + interval` samples of scratch.
    temp: Vec<f32>,
    /// Interleaved `output_latency` frames produced while output-seeking.
    preroll: Vec<f32>,
    block: BlockProcess,
    /// Input frame of the last block start, relative to the current call.
    prev_input_offset: isize,
    did_seek: bool,
    /// Next frame takes its phase from the input.
    fresh: bool,
    seek_time_factor: f32,
    silent_counter: usize,
    bypassing: bool,
    running: bool,
}

impl Core {
    fn new(config: StretchConfig) -> Result<Self, StretchError> {
        config.validate()?;
        let StretchConfig {
            channels,
            block_samples: block,
            interval_samples: interval,
            split_computation: split,
        } = config;
        let stft = Stft::new(
            StftConfig::new(channels, block, interval)
                .with_extra_input_history(interval + 1)
                .with_split_computation(split),
        )?;
        let bands = stft.bands();
        let fft_samples = stft.fft_samples();
        let output_latency = stft.synthesis_latency() + if split { interval } else { 0 };
        let len = channels * bands;
        Ok(Self {
            config,
            stashed_input: stft.input().clone(),
            pv: PhaseVocoder::new(channels, bands, fft_samples),
            spectral: SpectralMap::new(bands),
            formant: FormantEnvelope::new(bands, fft_samples),
            bands,
            input_bins: vec![COMPLEX_ZERO; len],
            energy: vec![0.0; len],
            output_bins: vec![COMPLEX_ZERO; len],
            output_energy: vec![0.0; len],
            input_phase: vec![0.0; len],
            mapped_freq: vec![0.0; len],
            temp: vec![0.0; block + interval],
            preroll: vec![0.0; output_latency * channels],
            block: BlockProcess::idle(),
            prev_input_offset: -1,
            did_seek: false,
            fresh: true,
            seek_time_factor: 1.0,
            silent_counter: 0,
            bypassing: false,
            running: false,
            stft,
        })
    }

    fn reset(&mut self) {
        self.stft.reset();
        self.stashed_input.clear();
        self.pv.reset();
        self.spectral.reset();
        self.formant.reset();
        self.input_bins.fill(COMPLEX_ZERO);
        self.energy.fill(0.0);
        self.output_bins.fill(COMPLEX_ZERO);
        self.output_energy.fill(0.0);
        self.input_phase.fill(0.0);
        self.mapped_freq.fill(0.0);
        self.block = BlockProcess::idle();
        self.prev_input_offset = -1;
        self.did_seek = false;
        self.fresh = true;
        self.seek_time_factor = 1.0;
        self.silent_counter = 0;
        self.bypassing = false;
        self.running = false;
    }

    fn input_latency(&self) -> usize {
        self.stft.analysis_latency()
    }

    fn output_latency(&self) -> usize {
        let deferred = if self.config.split_computation {
            self.config.interval_samples
        } else {
            0
        };
        self.stft.synthesis_latency() + deferred
    }

    fn seek_length(&self) -> usize {
        self.config.block_samples + self.config.interval_samples
    }

    fn output_seek_length(&self, playback_rate: f32) -> usize {
        let rate = sanitize_rate(playback_rate);
        self.input_latency() + (rate * self.output_latency() as f32).round() as usize
    }

    fn check_channels(&self, input: usize, output: usize) {
        let channels = self.config.channels;
        assert!(
            input >= channels && output >= channels,
            "engine configured for {channels} channels, got {input} in / {output} out"
        );
    }

    fn process<I, O>(&mut self, input: &I, output: &mut O, ctl: &mut Controls)
    where
        I: AudioInput + ?Sized,
        O: AudioOutput + ?Sized,
    {
        self.check_channels(input.channels(), output.channels());
        let channels = self.config.channels;
        let interval = self.config.interval_samples;
        let split = self.config.split_computation;
        let in_frames = input.frames();
        let out_frames = output.frames();
        self.running = true;

        if self.check_silence(input) {
            for i in 0..out_frames {
                for c in 0..channels {
                    let value = if in_frames > 0 {
                        input.sample(c, i % in_frames)
                    } else {
                        0.0
                    };
                    output.set_sample(c, i, value);
                }
            }
            return;
        }

        let mut copied = 0;
        for i in 0..out_frames {
            if self.block.samples_since_last >= interval {
                let input_offset =
                    ((i as f64 * in_frames as f64 / out_frames as f64).round() as usize).min(in_frames);
                self.copy_input(input, &mut copied, input_offset);
                self.start_block(input_offset, ctl);
                if !split {
                    self.run_steps(self.block.steps, ctl);
                }
            }
            if split {
                let done = self.block.steps * (self.block.samples_since_last + 1);
                self.run_steps(done.div_ceil(interval).min(self.block.steps), ctl);
            }
            for c in 0..channels {
                output.set_sample(c, i, self.stft.output_sample(c, 0));
            }
            self.stft.move_output(1);
            self.block.samples_since_last = self.block.samples_since_last.saturating_add(1);
        }

        self.copy_input(input, &mut copied, in_frames);
        self.prev_input_offset -= in_frames as isize;
    }

    /// Tracks input energy. Returns true once the input has been silent for
    /// two blocks, in which case the caller bypasses the STFT.
    fn check_silence<I: AudioInput + ?Sized>(&mut self, input: &I) -> bool {
        let mut energy = 0.0f32;
        for f in 0..input.frames() {
            for c in 0..self.config.channels {
                let s = input.sample(c, f);
                energy += s * s;
            }
        }
        if energy < NOISE_FLOOR {
            if self.silent_counter >= 2 * self.config.block_samples {
                if !self.bypassing {
                    trace!("silence bypass on after {} samples", self.silent_counter);
                    self.bypassing = true;
                    self.stft.reset();
                    self.pv.reset();
                    self.block = BlockProcess::idle();
                    self.prev_input_offset = -1;
                    self.fresh = true;
                }
                return true;
            }
            self.silent_counter = self.silent_counter.saturating_add(input.frames());
        } else {
            self.silent_counter = 0;
            if self.bypassing {
                trace!("silence bypass off");
                self.bypassing = false;
            }
        }
        false
    }

    /// Writes input frames `*copied..to` into the STFT history. Only the
    /// newest `block + interval` frames are kept; older ones are skipped.
    fn copy_input<I: AudioInput + ?Sized>(&mut self, input: &I, copied: &mut usize, to: usize) {
        let to = to.min(input.frames());
        if to <= *copied {
            return;
        }
        let count = to - *copied;
        let length = count.min(self.temp.len());
        let start = to - length;
        for c in 0..self.config.channels {
            for (k, slot) in self.temp[..length].iter_mut().enumerate() {
                *slot = input.sample(c, start + k);
            }
            self.stft.write_input(c, count - length, &self.temp[..length]);
        }
        self.stft.move_input(count, false);
        *copied = to;
    }

    fn start_block(&mut self, input_offset: usize, ctl: &Controls) {
        let channels = self.config.channels;
        let interval = self.config.interval_samples;
        let input_interval = input_offset as isize - self.prev_input_offset;
        self.prev_input_offset = input_offset as isize;

        if self.config.split_computation {
            self.stashed_input.copy_from(self.stft.input());
            self.stft.set_synthesis_offset(interval);
        }

        let new_spectrum = self.did_seek || input_interval > 0;
        let reanalyse =
            new_spectrum && (self.did_seek || (input_interval - interval as isize).abs() > 1);
        let time_factor = if self.did_seek {
            self.seek_time_factor
        } else if input_interval > 0 {
            interval as f32 / input_interval as f32
        } else {
            f32::INFINITY
        };
        let mapped = ctl.map.is_mapped();
        let formants = ctl.formant.is_active(mapped);

        let analyse = self.stft.analyse_steps();
        let mut steps = 0;
        if new_spectrum {
            if reanalyse {
                steps += analyse + 1;
            }
            steps += analyse + 1;
        }
        steps += channels;
        if mapped {
            steps += SMOOTH_STEPS + 1;
        }
        steps += 1;
        if formants {
            steps += FORMANT_STEPS;
        }
        steps += channels;
        if channels > 1 {
            steps += 1;
        }
        steps += 1 + self.stft.synthesise_steps();

        self.block = BlockProcess {
            samples_since_last: 0,
            steps,
            step: 0,
            new_spectrum,
            reanalyse,
            mapped,
            formants,
            time_factor,
            analysis_hop: if reanalyse {
                interval
            } else {
                input_interval.max(1) as usize
            },
        };
        self.did_seek = false;
    }

    fn run_steps(&mut self, until: usize, ctl: &mut Controls) {
        while self.block.step < until {
            self.run_step(self.block.step, ctl);
            self.block.step += 1;
        }
    }

    /// Completes the block in flight.
    fn settle(&mut self, ctl: &mut Controls) {
        self.run_steps(self.block.steps, ctl);
    }

    fn run_step(&mut self, mut step: usize, ctl: &mut Controls) {
        let channels = self.config.channels;
        let interval = self.config.interval_samples;
        let analyse = self.stft.analyse_steps();

        if self.block.new_spectrum {
            if self.block.reanalyse {
                if step < analyse {
                    self.analyse_step(step, interval);
                    return;
                }
                step -= analyse;
                if step == 0 {
                    for c in 0..channels {
                        self.pv.set_reference(c, self.stft.spectrum(c));
                    }
                    return;
                }
                step -= 1;
            }
            if step < analyse {
                self.analyse_step(step, 0);
                return;
            }
            step -= analyse;
            if step == 0 {
                for c in 0..channels {
                    self.input_bins[c * self.bands..(c + 1) * self.bands]
                        .copy_from_slice(self.stft.spectrum(c));
                }
                return;
            }
            step -= 1;
        }

        if step < channels {
            self.measure_channel(step);
            return;
        }
        step -= channels;

        if self.block.mapped {
            if step < SMOOTH_STEPS {
                let smoothing_bins = self.stft.fft_samples() as f32 / interval as f32;
                self.spectral.smooth_step(step, &self.energy, smoothing_bins);
                return;
            }
            step -= SMOOTH_STEPS;
            if step == 0 {
                self.spectral.find_peaks(&ctl.map, self.stft.fft_samples());
                return;
            }
            step -= 1;
        }

        if step == 0 {
            if self.block.mapped {
                self.spectral.update_output_map();
            } else {
                self.spectral.set_identity();
            }
            return;
        }
        step -= 1;

        if self.block.formants {
            if step < FORMANT_STEPS {
                self.formant
                    .step(step, &mut self.energy, &ctl.formant, &ctl.map);
                return;
            }
            step -= FORMANT_STEPS;
        }

        if step < channels {
            self.synthesise_channel(step, ctl);
            return;
        }
        step -= channels;

        if channels > 1 {
            if step == 0 {
                self.lock_channels();
                return;
            }
            step -= 1;
        }

        if step == 0 {
            for c in 0..channels {
                self.stft
                    .spectrum_mut(c)
                    .copy_from_slice(&self.output_bins[c * self.bands..(c + 1) * self.bands]);
            }
            self.fresh = false;
            return;
        }
        step -= 1;

        self.stft.synthesise_step(step);
    }

    /// Analyses against the input as it was at block start.
    fn analyse_step(&mut self, step: usize, samples_in_past: usize) {
        if self.config.split_computation {
            self.stft.swap_input(&mut self.stashed_input);
            self.stft.analyse_step(step, samples_in_past);
            self.stft.swap_input(&mut self.stashed_input);
        } else {
            self.stft.analyse_step(step, samples_in_past);
        }
    }

    fn measure_channel(&mut self, channel: usize) {
        let range = channel * self.bands..(channel + 1) * self.bands;
        if self.block.new_spectrum {
            self.pv
                .measure(channel, &self.input_bins[range.clone()], self.block.analysis_hop);
        }
        for (e, bin) in self.energy[range.clone()].iter_mut().zip(&self.input_bins[range]) {
            *e = bin.norm_sqr();
        }
    }

    fn synthesise_channel(&mut self, channel: usize, ctl: &mut Controls) {
        let bands = self.bands;
        let base = channel * bands;
        let interval = self.config.interval_samples;
        let time_factor = self.block.time_factor;
        let jitter = if time_factor > MAX_CLEAN_STRETCH {
            f64::from(1.0 - MAX_CLEAN_STRETCH / time_factor)
        } else {
            0.0
        };

        let energy = &self.energy[base..base + bands];
        let input = &self.input_bins[base..base + bands];
        let freq = self.pv.frequency(channel);
        for b in 0..bands {
            let point = self.spectral.point(b);
            let (e, phase, f) = match fractional_bin(point.input_bin, bands) {
                Some((low, high, frac)) => {
                    let e = energy[low] + (energy[high] - energy[low]) * frac;
                    let x = input[low] + (input[high] - input[low]) * frac;
                    let f = freq[low] + (freq[high] - freq[low]) * f64::from(frac);
                    ((e * point.freq_grad).max(0.0), x.im.atan2(x.re), f)
                }
                None => (0.0, 0.0, point.input_bin as f64 / self.stft.fft_samples() as f64),
            };
            self.output_energy[base + b] = e;
            self.input_phase[base + b] = phase;
            self.mapped_freq[base + b] = f;
        }

        let out_energy = &self.output_energy[base..base + bands];
        for b in 0..bands {
            let phase = if self.fresh {
                let phase = f64::from(self.input_phase[base + b]);
                self.pv.set_output_phase(channel, b, phase);
                phase
            } else {
                let f_in = self.mapped_freq[base + b];
                let f_out = if self.block.mapped {
                    f64::from(ctl.map.map(f_in as f32))
                } else {
                    f_in
                };
                let mut phase = self.pv.advance(channel, b, f_out, interval);
                let e = out_energy[b];
                let is_peak = (b == 0 || e >= out_energy[b - 1])
                    && (b + 1 == bands || e >= out_energy[b + 1]);
                if jitter > 0.0 && !is_peak {
                    phase += ctl.rng.gen_range(-PI..PI) * jitter;
                    self.pv.set_output_phase(channel, b, phase);
                }
                phase
            };
            self.output_bins[base + b] = Complex::from_polar(out_energy[b].sqrt(), phase as f32);
        }
    }

    /// Per bin, the loudest channel keeps its phase and the others follow it
    /// with their input phase difference.
    fn lock_channels(&mut self) {
        let bands = self.bands;
        let channels = self.config.channels;
        for b in 0..bands {
            let mut reference = 0;
            for c in 1..channels {
                if self.output_energy[c * bands + b] > self.output_energy[reference * bands + b] {
                    reference = c;
                }
            }
            let ref_output = self.pv.output_phase(reference, b);
            let ref_input = self.input_phase[reference * bands + b];
            for c in (0..channels).filter(|&c| c != reference) {
                let index = c * bands + b;
                let phase = ref_output + f64::from(self.input_phase[index] - ref_input);
                self.pv.set_output_phase(c, b, phase);
                self.output_bins[index] = Complex::from_polar(
                    self.output_energy[index].sqrt(),
                    self.pv.output_phase(c, b) as f32,
                );
            }
        }
    }

    fn seek<I: AudioInput + ?Sized>(&mut self, input: &I, playback_rate: f32, ctl: &mut Controls) {
        self.check_channels(input.channels(), self.config.channels);
        self.settle(ctl);
        let length = self.seek_length();
        let frames = input.frames();
        let used = frames.min(length);
        let pad = length - used;
        let mut energy = 0.0f32;
        for c in 0..self.config.channels {
            self.temp[..pad].fill(0.0);
            for k in 0..used {
                let s = input.sample(c, frames - used + k);
                energy += s * s;
                self.temp[pad + k] = s;
            }
            self.stft.write_input(c, 0, &self.temp[..length]);
        }
        self.stft.move_input(length, false);

        if energy >= NOISE_FLOOR {
            self.silent_counter = 0;
            self.bypassing = false;
        }
        let rate = sanitize_rate(playback_rate);
        let interval = self.config.interval_samples as f32;
        self.seek_time_factor = if rate * interval > 1.0 {
            1.0 / rate
        } else {
            interval
        };
        self.did_seek = true;
        self.fresh = true;
        self.prev_input_offset = 0;
        self.block = BlockProcess::idle();
        self.running = true;
        debug!(
            "seek: {} of {} frames, playback rate {:.3}",
            used, frames, rate
        );
    }

    fn output_seek<I: AudioInput + ?Sized>(&mut self, input: &I, ctl: &mut Controls) {
        self.reset();
        let channels = self.config.channels;
        let frames = input.frames();
        let input_latency = self.input_latency();
        let output_latency = self.output_latency();
        let surplus = frames.saturating_sub(input_latency);
        let rate = surplus as f32 / output_latency.max(1) as f32;
        let seek_frames = frames - surplus;
        debug!(
            "output seek: {} frames, {} surplus, playback rate {:.3}",
            frames, surplus, rate
        );
        self.seek(&FrameSlice::new(input, 0, seek_frames), rate, ctl);

        let mut preroll = std::mem::take(&mut self.preroll);
        self.process(
            &FrameSlice::new(input, seek_frames, surplus),
            &mut InterleavedMut::with_frames(&mut preroll, channels, output_latency),
            ctl,
        );
        for c in 0..channels {
            for (k, slot) in self.temp[..output_latency].iter_mut().enumerate() {
                *slot = -preroll[(output_latency - 1 - k) * channels + c];
            }
            self.stft.add_output(c, 0, &self.temp[..output_latency]);
        }
        self.preroll = preroll;
    }

    fn flush<O: AudioOutput + ?Sized>(&mut self, output: &mut O, playback_rate: f32, ctl: &mut Controls) {
        self.check_channels(self.config.channels, output.channels());
        let channels = self.config.channels;
        let out_frames = output.frames();
        let output_block = out_frames.saturating_sub(self.config.interval_samples);
        let rate = sanitize_rate(playback_rate);
        debug!(
            "flush: {} frames ({} processed), playback rate {:.3}",
            out_frames, output_block, rate
        );
        if output_block > 0 {
            let silence = Silence {
                channels,
                frames: (output_block as f32 * rate).round() as usize,
            };
            self.process(&silence, &mut FrameSliceMut::new(output, 0, output_block), ctl);
        }
        self.settle(ctl);

        let tail = out_frames - output_block;
        self.stft.finish_output(1.0, 0);
        for c in 0..channels {
            let (current, next) = self.temp[..2 * tail].split_at_mut(tail);
            self.stft.read_output(c, 0, current);
            self.stft.read_output(c, tail, next);
            for k in 0..tail {
                output.set_sample(c, output_block + k, current[k] - next[tail - 1 - k]);
            }
        }
        self.reset();
    }

    fn exact<I, O>(&mut self, input: &I, output: &mut O, ctl: &mut Controls) -> bool
    where
        I: AudioInput + ?Sized,
        O: AudioOutput + ?Sized,
    {
        let in_frames = input.frames();
        let out_frames = output.frames();
        if in_frames == 0 || out_frames == 0 {
            clear_output(output);
            return false;
        }
        let rate = in_frames as f32 / out_frames as f32;
        let seek_length = self.output_seek_length(rate);
        let flush_frames = (seek_length as f32 / rate).round() as usize;
        if in_frames < seek_length || out_frames < flush_frames {
            clear_output(output);
            return false;
        }
        self.output_seek(&FrameSlice::new(input, 0, seek_length), ctl);
        let output_index = out_frames - flush_frames;
        self.process(
            &FrameSlice::new(input, seek_length, in_frames - seek_length),
            &mut FrameSliceMut::new(output, 0, output_index),
            ctl,
        );
        self.flush(&mut FrameSliceMut::new(output, output_index, flush_frames), rate, ctl);
        true
    }
}

fn clear_output<O: AudioOutput + ?Sized>(output: &mut O) {
    for c in 0..output.channels() {
        for f in 0..output.frames() {
            output.set_sample(c, f, 0.0);
        }
    }
}

/// Non-finite or negative playback rates become 1 and 0 respectively.
fn sanitize_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.max(0.0)
    } else {
        1.0
    }
}

/// Real-time phase-vocoder time stretcher and pitch shifter.
///
/// Configure with [`Stretch::configure`] or a preset, then call
/// [`Stretch::process`] with any ratio of input to output frames: the ratio
/// is the playback rate for that call. Transposition, custom frequency maps
/// and formant settings can change between calls and take effect on the next
/// block.
///
/// ```
/// use phasestretch::Stretch;
///
/// let mut stretch = Stretch::with_seed(7);
/// stretch.configure(1, 1024, 256, false).unwrap();
/// stretch.set_transpose_semitones(3.0, 0.0);
///
/// let input = vec![0.0f32; 512];
/// let mut output = vec![0.0f32; 1024]; // half speed
/// stretch.process(&input, &mut output);
/// ```
pub struct Stretch {
    controls: Controls,
    core: Option<Core>,
}

impl Default for Stretch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stretch {
    /// Unconfigured engine with an entropy-seeded phase randomiser.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Unconfigured engine whose output is reproducible for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            controls: Controls {
                map: FrequencyMap::default(),
                formant: FormantShift::default(),
                rng,
            },
            core: None,
        }
    }

    /// Sizes every buffer for `channels` channels, `block_samples` windows
    /// and `interval_samples` hops.
    ///
    /// # Errors
    /// Returns a configuration error for zero channels, blocks shorter than
    /// two samples, or an interval outside `1..=block_samples`. On error the
    /// engine keeps its previous configuration and state.
    pub fn configure(
        &mut self,
        channels: usize,
        block_samples: usize,
        interval_samples: usize,
        split_computation: bool,
    ) -> Result<(), StretchError> {
        self.configure_with(&StretchConfig::new(
            channels,
            block_samples,
            interval_samples,
            split_computation,
        ))
    }

    pub fn configure_with(&mut self, config: &StretchConfig) -> Result<(), StretchError> {
        let core = Core::new(*config)?;
        debug!(
            "configured: {} channels, block {}, interval {}, fft {}, split {}, latency {} + {}",
            config.channels,
            config.block_samples,
            config.interval_samples,
            core.stft.fft_samples(),
            config.split_computation,
            core.input_latency(),
            core.output_latency()
        );
        self.core = Some(core);
        Ok(())
    }

    /// 120 ms blocks every 30 ms.
    pub fn preset_default(
        &mut self,
        channels: usize,
        sample_rate: f32,
        split_computation: bool,
    ) -> Result<(), StretchError> {
        let config =
            StretchConfig::from_preset(Preset::Default, channels, sample_rate, split_computation)?;
        self.configure_with(&config)
    }

    /// 100 ms blocks every 40 ms, for less CPU.
    pub fn preset_cheaper(
        &mut self,
        channels: usize,
        sample_rate: f32,
        split_computation: bool,
    ) -> Result<(), StretchError> {
        let config =
            StretchConfig::from_preset(Preset::Cheaper, channels, sample_rate, split_computation)?;
        self.configure_with(&config)
    }

    pub fn state(&self) -> EngineState {
        match &self.core {
            None => EngineState::Unconfigured,
            Some(core) if core.running => EngineState::Running,
            Some(_) => EngineState::Configured,
        }
    }

    pub fn config(&self) -> Option<StretchConfig> {
        self.core.as_ref().map(|core| core.config)
    }

    pub fn channels(&self) -> usize {
        self.config().map_or(0, |c| c.channels)
    }

    pub fn block_samples(&self) -> usize {
        self.config().map_or(0, |c| c.block_samples)
    }

    pub fn interval_samples(&self) -> usize {
        self.config().map_or(0, |c| c.interval_samples)
    }

    pub fn split_computation(&self) -> bool {
        self.config().is_some_and(|c| c.split_computation)
    }

    /// Input frames between the newest input and the analysed frame centre.
    pub fn input_latency(&self) -> usize {
        self.core.as_ref().map_or(0, Core::input_latency)
    }

    /// Output frames between a frame centre and the output read position.
    pub fn output_latency(&self) -> usize {
        self.core.as_ref().map_or(0, Core::output_latency)
    }

    /// Clears buffers and phase state, keeping the configuration and all
    /// transpose/formant settings.
    pub fn reset(&mut self) {
        if let Some(core) = self.core.as_mut() {
            core.reset();
            debug!("reset");
        }
    }

    // ---- frequency and formant settings ----

    /// Transposes by `factor`, clamped to `[1/64, 64]`. A negative factor
    /// transposes down by its magnitude.
    /// Above `tonality_limit` (normalised frequency) the map becomes a
    /// constant shift; zero or less means no limit. Clears a custom map.
    pub fn set_transpose_factor(&mut self, factor: f32, tonality_limit: f32) {
        self.controls.map.set_transpose(factor, tonality_limit);
    }

    pub fn set_transpose_semitones(&mut self, semitones: f32, tonality_limit: f32) {
        self.set_transpose_factor(semitones_to_factor(semitones), tonality_limit);
    }

    /// Replaces transposition with an arbitrary map on normalised frequency.
    /// The map should be increasing; peaks it would fold are dropped.
    pub fn set_freq_map<F>(&mut self, map: F)
    where
        F: Fn(f32) -> f32 + Send + 'static,
    {
        self.controls.map.set_custom(Box::new(map));
    }

    pub fn clear_freq_map(&mut self) {
        self.controls.map.clear_custom();
    }

    /// Shifts formants by `factor` (negative shifts down, as for
    /// [`Stretch::set_transpose_factor`]). With `compensate_pitch` the envelope
    /// also stays put when the pitch is transposed.
    pub fn set_formant_factor(&mut self, factor: f32, compensate_pitch: bool) {
        self.controls.formant.set_factor(factor, compensate_pitch);
    }

    pub fn set_formant_semitones(&mut self, semitones: f32, compensate_pitch: bool) {
        self.controls.formant.set_semitones(semitones, compensate_pitch);
    }

    /// Fundamental (normalised frequency) the formant envelope is fitted
    /// around; zero or less estimates it from the input.
    pub fn set_formant_base(&mut self, freq: f32) {
        self.controls.formant.set_base(freq);
    }

    pub fn frequency_map(&self) -> &FrequencyMap {
        &self.controls.map
    }

    pub fn formant_shift(&self) -> &FormantShift {
        &self.controls.formant
    }

    // ---- processing ----

    fn parts(&mut self) -> (&mut Core, &mut Controls) {
        match self.core.as_mut() {
            Some(core) => (core, &mut self.controls),
            None => panic!("Stretch must be configured before processing"),
        }
    }

    /// Processes interleaved buffers. The frame counts are the slice lengths
    /// divided by the channel count.
    ///
    /// # Panics
    /// Panics if the engine is unconfigured.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let channels = self.configured_channels();
        self.process_buffers(
            &Interleaved::new(input, channels),
            &mut InterleavedMut::new(output, channels),
        );
    }

    /// Processes `input_frames` interleaved frames into `output_frames`.
    ///
    /// # Panics
    /// Panics if the engine is unconfigured or a slice is too short.
    pub fn process_frames(
        &mut self,
        input: &[f32],
        input_frames: usize,
        output: &mut [f32],
        output_frames: usize,
    ) {
        let channels = self.configured_channels();
        self.process_buffers(
            &Interleaved::with_frames(input, channels, input_frames),
            &mut InterleavedMut::with_frames(output, channels, output_frames),
        );
    }

    pub fn process_buffers<I, O>(&mut self, input: &I, output: &mut O)
    where
        I: AudioInput + ?Sized,
        O: AudioOutput + ?Sized,
    {
        let (core, controls) = self.parts();
        core.process(input, output, controls);
    }

    /// Input frames [`Stretch::seek`] uses: `block + interval`.
    pub fn seek_length(&self) -> usize {
        self.core.as_ref().map_or(0, Core::seek_length)
    }

    /// Jumps to a new input position. The last [`Stretch::seek_length`]
    /// frames of `input` (zero-padded if shorter) become the input history;
    /// the pending output crossfades into the new position.
    pub fn seek(&mut self, input: &[f32], playback_rate: f32) {
        let channels = self.configured_channels();
        self.seek_buffers(&Interleaved::new(input, channels), playback_rate);
    }

    pub fn seek_frames(&mut self, input: &[f32], input_frames: usize, playback_rate: f32) {
        let channels = self.configured_channels();
        self.seek_buffers(
            &Interleaved::with_frames(input, channels, input_frames),
            playback_rate,
        );
    }

    pub fn seek_buffers<I: AudioInput + ?Sized>(&mut self, input: &I, playback_rate: f32) {
        let (core, controls) = self.parts();
        core.seek(input, playback_rate, controls);
    }

    /// Input frames [`Stretch::output_seek`] needs so the next output frame
    /// lines up with the end of its input.
    pub fn output_seek_length(&self, playback_rate: f32) -> usize {
        self.core
            .as_ref()
            .map_or(0, |core| core.output_seek_length(playback_rate))
    }

    /// Resets, then primes the engine so the next output frame corresponds
    /// to the end of `input` with no fade-in.
    pub fn output_seek(&mut self, input: &[f32]) {
        let channels = self.configured_channels();
        self.output_seek_buffers(&Interleaved::new(input, channels));
    }

    pub fn output_seek_buffers<I: AudioInput + ?Sized>(&mut self, input: &I) {
        let (core, controls) = self.parts();
        core.output_seek(input, controls);
    }

    /// Drains the latency into `output` as if silence followed, tapers the
    /// end, and resets.
    pub fn flush(&mut self, output: &mut [f32], playback_rate: f32) {
        let channels = self.configured_channels();
        self.flush_buffers(&mut InterleavedMut::new(output, channels), playback_rate);
    }

    pub fn flush_frames(&mut self, output: &mut [f32], output_frames: usize, playback_rate: f32) {
        let channels = self.configured_channels();
        self.flush_buffers(
            &mut InterleavedMut::with_frames(output, channels, output_frames),
            playback_rate,
        );
    }

    pub fn flush_buffers<O: AudioOutput + ?Sized>(&mut self, output: &mut O, playback_rate: f32) {
        let (core, controls) = self.parts();
        core.flush(output, playback_rate, controls);
    }

    /// Stretches all of `input` into exactly all of `output`, time-aligned:
    /// output-seek, process, then flush. Returns false, with `output` filled
    /// with silence, when `input` is shorter than the output-seek length or
    /// `output` cannot hold the flushed tail.
    pub fn exact(&mut self, input: &[f32], output: &mut [f32]) -> bool {
        let channels = self.configured_channels();
        self.exact_buffers(
            &Interleaved::new(input, channels),
            &mut InterleavedMut::new(output, channels),
        )
    }

    pub fn exact_buffers<I, O>(&mut self, input: &I, output: &mut O) -> bool
    where
        I: AudioInput + ?Sized,
        O: AudioOutput + ?Sized,
    {
        let (core, controls) = self.parts();
        core.exact(input, output, controls)
    }

    fn configured_channels(&self) -> usize {
        match &self.core {
            Some(core) => core.config.channels,
            None => panic!("Stretch must be configured before processing"),
        }
    }
}
