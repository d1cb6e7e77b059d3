mod common;

use common::{estimate_freq_zero_crossings, gen_sine, interleave, windowed_rms};
use phasestretch::{Preset, StreamProcessor, StretchError, StretchParams};

const SR: u32 = 44100;

#[test]
fn output_length_tracks_ratio() {
    for &ratio in &[0.5, 0.75, 1.0, 1.25, 2.5] {
        let params = StretchParams::new(ratio)
            .unwrap()
            .with_sample_rate(SR)
            .with_channels(2);
        let mut processor = StreamProcessor::new(params).unwrap();
        let mono = gen_sine(440.0, SR, 30_000, |_| 0.5);
        let input = interleave(&[mono.clone(), mono]);

        let mut frames = 0;
        for chunk in input.chunks(2 * 487) {
            let out = processor.process(chunk).unwrap();
            assert_eq!(out.len() % 2, 0);
            frames += out.len() / 2;
        }
        let expected = (30_000.0 * ratio).floor() as usize;
        assert_eq!(frames, expected, "ratio {ratio}");
    }
}

#[test]
fn stretched_stream_keeps_pitch_and_level() {
    let params = StretchParams::new(1.5)
        .unwrap()
        .with_sample_rate(SR)
        .with_preset(Preset::Cheaper);
    let mut processor = StreamProcessor::new(params).unwrap();
    let input = gen_sine(500.0, SR, 2 * SR as usize, |_| 0.5);

    let mut output = Vec::new();
    let mut buffer = Vec::new();
    for chunk in input.chunks(1024) {
        processor.process_into(chunk, &mut buffer).unwrap();
        output.extend_from_slice(&buffer);
    }
    output.extend(processor.flush().unwrap());

    let middle = &output[30_000..110_000];
    let freq = estimate_freq_zero_crossings(middle, SR, 0, middle.len());
    assert!((freq - 500.0).abs() < 8.0, "estimated {freq} Hz");
    let rms = windowed_rms(middle, 0, middle.len());
    assert!((0.25..0.45).contains(&rms), "rms {rms}");
}

#[test]
fn transposed_stream_from_params() {
    let params = StretchParams::new(1.0)
        .unwrap()
        .with_sample_rate(SR)
        .with_transpose_semitones(12.0);
    let mut processor = StreamProcessor::new(params).unwrap();
    assert!((processor.engine_mut().frequency_map().factor() - 2.0).abs() < 1e-6);

    let input = gen_sine(300.0, SR, 2 * SR as usize, |_| 0.5);
    let mut output = Vec::new();
    for chunk in input.chunks(2048) {
        output.extend(processor.process(chunk).unwrap());
    }
    let middle = &output[20_000..80_000];
    let freq = estimate_freq_zero_crossings(middle, SR, 0, middle.len());
    assert!((freq - 600.0).abs() < 10.0, "estimated {freq} Hz");
}

#[test]
fn ratio_changes_are_smoothed() {
    let params = StretchParams::new(1.0).unwrap().with_sample_rate(SR);
    let mut processor = StreamProcessor::new(params).unwrap();
    processor.set_stretch_ratio(2.0).unwrap();

    let chunk = vec![0.0; 1000];
    let first = processor.process(&chunk).unwrap().len();
    assert!(first > 1000 && first < 1200, "first chunk {first}");
    for _ in 0..200 {
        processor.process(&chunk).unwrap();
    }
    assert_eq!(processor.current_stretch_ratio(), 2.0);
    let settled = processor.process(&chunk).unwrap().len();
    assert_eq!(settled, 2000);
}

#[test]
fn invalid_params_are_rejected() {
    assert!(matches!(
        StretchParams::new(-2.0),
        Err(StretchError::InvalidStretchRatio(_))
    ));
    let params = StretchParams::new(1.0)
        .unwrap()
        .with_channels(0);
    assert!(matches!(
        StreamProcessor::new(params),
        Err(StretchError::InvalidChannels(0))
    ));
    let params = StretchParams::new(1.0)
        .unwrap()
        .with_block_samples(512)
        .with_interval_samples(1024);
    assert!(StreamProcessor::new(params).unwrap_err().is_configuration());
}

#[test]
fn latency_matches_engine() {
    let params = StretchParams::new(1.0)
        .unwrap()
        .with_sample_rate(48000)
        .with_split_computation(true);
    let mut processor = StreamProcessor::new(params).unwrap();
    let engine = processor.engine_mut();
    let expected = engine.input_latency() + engine.output_latency();
    assert_eq!(expected, 5760 + 1440);
    assert_eq!(processor.latency_samples(), expected);
    assert!((processor.latency_secs() - expected as f64 / 48000.0).abs() < 1e-9);
}
