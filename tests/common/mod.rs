#![allow(dead_code)]

use std::f32::consts::PI;

use phasestretch::Stretch;

pub fn gen_sine<F>(freq_hz: f32, sr: u32, n: usize, amp_fn: F) -> Vec<f32>
where
    F: Fn(usize) -> f32,
{
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * freq_hz * i as f32 / sr as f32;
            amp_fn(i) * phase.sin()
        })
        .collect()
}

pub fn gen_two_tone(
    freq_a: f32,
    amp_a: f32,
    freq_b: f32,
    amp_b: f32,
    sr: u32,
    n: usize,
) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = i as f32 / sr as f32;
            amp_a * (2.0 * PI * freq_a * t).sin() + amp_b * (2.0 * PI * freq_b * t).sin()
        })
        .collect()
}

/// Interleaves per-channel signals of equal length.
pub fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    (0..frames)
        .flat_map(|i| channels.iter().map(move |ch| ch[i]))
        .collect()
}

pub fn windowed_rms(signal: &[f32], start: usize, len: usize) -> f64 {
    if signal.is_empty() || len == 0 {
        return 0.0;
    }
    let start = start.min(signal.len());
    let end = (start + len).min(signal.len());
    if end <= start {
        return 0.0;
    }
    let sum_sq: f64 = signal[start..end]
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    (sum_sq / (end - start) as f64).sqrt()
}

pub fn count_positive_zero_crossings(signal: &[f32], start: usize, end: usize) -> usize {
    if signal.len() < 2 {
        return 0;
    }
    let start = start.min(signal.len() - 1);
    let end = end.min(signal.len());
    if end <= start + 1 {
        return 0;
    }
    let mut count = 0usize;
    for i in start..(end - 1) {
        if signal[i] <= 0.0 && signal[i + 1] > 0.0 {
            count += 1;
        }
    }
    count
}

pub fn estimate_freq_zero_crossings(signal: &[f32], sr: u32, start: usize, end: usize) -> f64 {
    if end <= start + 1 {
        return 0.0;
    }
    let crossings = count_positive_zero_crossings(signal, start, end) as f64;
    let duration_secs = (end - start) as f64 / sr as f64;
    if duration_secs <= 0.0 {
        0.0
    } else {
        crossings / duration_secs
    }
}

pub fn energy_at_freq(signal: &[f32], sr: u32, freq_hz: f32) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (i, &s) in signal.iter().enumerate() {
        let angle = 2.0 * std::f64::consts::PI * freq_hz as f64 * i as f64 / sr as f64;
        let sv = s as f64;
        re += sv * angle.cos();
        im -= sv * angle.sin();
    }
    (re * re + im * im).sqrt() / signal.len() as f64
}

pub fn best_lag_crosscorr(a: &[f32], b: &[f32], max_lag: usize) -> isize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut best_lag = 0isize;
    let mut best_score = f64::NEG_INFINITY;

    for lag in -(max_lag as isize)..=(max_lag as isize) {
        let mut dot = 0.0f64;
        let mut a2 = 0.0f64;
        let mut b2 = 0.0f64;
        let mut n = 0usize;

        for (i, &av) in a.iter().enumerate() {
            let j = i as isize + lag;
            if j < 0 || j >= b.len() as isize {
                continue;
            }
            let bv = b[j as usize] as f64;
            let av = av as f64;
            dot += av * bv;
            a2 += av * av;
            b2 += bv * bv;
            n += 1;
        }

        if n < 16 || a2 <= 0.0 || b2 <= 0.0 {
            continue;
        }
        let score = dot / (a2.sqrt() * b2.sqrt());
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    best_lag
}

/// Runs interleaved `input` through `engine` at playback rate 1, in chunks
/// of uneven size.
pub fn process_unity_chunked(engine: &mut Stretch, input: &[f32], chunk_frames: &[usize]) -> Vec<f32> {
    let channels = engine.channels();
    let frames = input.len() / channels;
    let mut output = vec![0.0; input.len()];
    let mut pos = 0;
    for &chunk in chunk_frames.iter().cycle() {
        let n = chunk.max(1).min(frames - pos);
        if n == 0 {
            break;
        }
        let range = pos * channels..(pos + n) * channels;
        engine.process(&input[range.clone()], &mut output[range]);
        pos += n;
    }
    output
}

/// Runs mono `input` through `engine`, producing `ratio` output frames per
/// input frame, with `chunk` input frames per call.
pub fn process_at_ratio(engine: &mut Stretch, input: &[f32], ratio: f64, chunk: usize) -> Vec<f32> {
    let mut output = Vec::new();
    let mut owed = 0.0f64;
    for block in input.chunks(chunk.max(1)) {
        let exact = block.len() as f64 * ratio + owed;
        let frames = exact.floor() as usize;
        owed = exact - frames as f64;
        let start = output.len();
        output.resize(start + frames, 0.0);
        engine.process(block, &mut output[start..]);
    }
    output
}
