use approx::assert_abs_diff_eq;
use proptest::prelude::*;

use phasestretch::core::window::{cola_ripple, generate_window, synthesis_window};
use phasestretch::{Stft, StftConfig, WindowShape};

fn shape_strategy() -> impl Strategy<Value = WindowShape> {
    prop_oneof![
        Just(WindowShape::Hann),
        Just(WindowShape::BlackmanHarris),
        (100u32..=1000).prop_map(WindowShape::Kaiser),
        (100u32..=400).prop_map(WindowShape::ConfinedGaussian),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn analysis_times_synthesis_overlaps_to_one(
        length in 16usize..2048,
        divisor in 2usize..16,
        shape in shape_strategy(),
        asymmetry in -1.0f32..=1.0,
    ) {
        let interval = (length / divisor).max(1);
        let analysis = generate_window(shape, asymmetry, length).unwrap();
        let synthesis = synthesis_window(&analysis, interval);
        prop_assert_eq!(synthesis.len(), length);
        let ripple = cola_ripple(&analysis, &synthesis, interval);
        prop_assert!(ripple < 1e-4, "ripple {} for {:?}", ripple, shape);
    }

    #[test]
    fn latencies_always_sum_to_block(
        block in 2usize..3000,
        divisor in 1usize..8,
        asymmetry in -1.0f32..=1.0,
    ) {
        let interval = (block / divisor).max(1);
        let stft = Stft::new(
            StftConfig::new(1, block, interval).with_asymmetry(asymmetry),
        ).unwrap();
        prop_assert_eq!(stft.latency(), block);
        prop_assert!(stft.fft_samples() >= block);
        prop_assert!(stft.fft_samples().is_power_of_two());
    }
}

#[test]
fn asymmetric_stft_round_trip_is_delayed_input() {
    let config = StftConfig::new(1, 1000, 200)
        .with_asymmetry(-0.6)
        .with_shape(WindowShape::BlackmanHarris);
    let mut stft = Stft::new(config).unwrap();
    let latency = stft.latency();
    let input: Vec<f32> = (0..10_000)
        .map(|i| (i as f32 * 0.05).sin() * 0.5 + (i as f32 * 0.31).cos() * 0.25)
        .collect();
    let mut output = vec![0.0; input.len()];
    for (chunk_in, chunk_out) in input.chunks(200).zip(output.chunks_mut(200)) {
        stft.analyse(0);
        stft.synthesise();
        stft.read_output(0, 0, chunk_out);
        stft.move_output(chunk_out.len());
        stft.write_input(0, 0, chunk_in);
        stft.move_input(chunk_in.len(), false);
    }
    for t in latency..input.len() {
        assert_abs_diff_eq!(output[t], input[t - latency], epsilon = 1e-3);
    }
}
