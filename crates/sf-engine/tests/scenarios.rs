//! End-to-end pipeline scenarios
//!
//! Exercises complete chains through the public pipeline API: streaming
//! continuity, filter impulse responses, FFT round trips, rational
//! resampling, time alignment, and snapshot save/restore.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sf_engine::{params, Pipeline, ProcessOptions};

fn noise(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// S1: streaming moving average
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn moving_average_streams_across_sub_buffers() {
    let p = Pipeline::new();
    p.add_stage("movingAverage", params!({"mode": "moving", "windowSize": 3}))
        .unwrap();
    let opts = ProcessOptions::channels(1);
    let first = p.process_sync(&[1.0, 2.0, 3.0], None, &opts).unwrap();
    let second = p.process_sync(&[4.0, 5.0], None, &opts).unwrap();
    let all: Vec<f32> = first.into_iter().chain(second).collect();
    assert_eq!(all, vec![1.0, 1.5, 2.0, 3.0, 4.0]);
}

#[test]
fn segmented_equals_whole_stream() {
    // property 1: state retention makes segmentation invisible
    let signal = noise(512, 1);
    let build = || {
        let p = Pipeline::new();
        p.add_stage("rms", params!({"mode": "moving", "windowSize": 16}))
            .unwrap();
        p.add_stage("exponentialMovingAverage", params!({"alpha": 0.25}))
            .unwrap();
        p
    };
    let opts = ProcessOptions::channels(1);

    let whole = build().process_sync(&signal, None, &opts).unwrap();

    let split = build();
    let mut parts = Vec::new();
    for chunk in signal.chunks(100) {
        parts.extend(split.process_sync(chunk, None, &opts).unwrap());
    }
    assert_eq!(whole.len(), parts.len());
    for (a, b) in whole.iter().zip(&parts) {
        assert!((a - b).abs() < 1e-6);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S2: FIR impulse response
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn fir_lowpass_impulse_replays_taps() {
    let p = Pipeline::new();
    p.add_stage(
        "filter:fir",
        params!({"design": "lowpass", "order": 21, "cutoff": 0.1, "window": "hamming"}),
    )
    .unwrap();
    let mut impulse = vec![0.0f32; 64];
    impulse[0] = 1.0;
    let out = p
        .process_sync(&impulse, None, &ProcessOptions::channels(1))
        .unwrap();

    // reference taps from the same design
    let taps = sf_dsp::fir::design_coefficients(
        sf_dsp::fir::FirBand::Lowpass,
        21,
        0.1,
        0.0,
        sf_dsp::WindowKind::Hamming,
    )
    .unwrap();
    for i in 0..21 {
        assert!((out[i] - taps[i]).abs() < 1e-6, "tap {i}");
    }
    for &v in &out[21..] {
        assert!(v.abs() < 1e-6);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S3: FFT round trip (core engine property)
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn rfft_irfft_recovers_two_tone_signal() {
    use num_complex::Complex;
    let n = 1024;
    let engine = sf_dsp::fft::FftEngine::new(n).unwrap();
    let x: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            ((2.0 * std::f64::consts::PI * 5.0 * t).cos()
                + 0.5 * (2.0 * std::f64::consts::PI * 50.0 * t).sin()) as f32
        })
        .collect();
    let mut spec = vec![Complex::new(0.0f32, 0.0); engine.real_bins()];
    let mut back = vec![0.0f32; n];
    engine.rfft(&x, &mut spec).unwrap();
    engine.irfft(&spec, &mut back).unwrap();
    let max_err = x
        .iter()
        .zip(&back)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_err < 1e-5, "max err {max_err}");
}

// ═══════════════════════════════════════════════════════════════════════════
// S4: rational resampler
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn rational_resampler_3_2_on_stereo_constant() {
    let p = Pipeline::new();
    p.add_stage("resample", params!({"upFactor": 3, "downFactor": 2}))
        .unwrap();
    // 300 frames x 2 channels = 600 values of constant 1
    let input = vec![1.0f32; 600];
    let out = p
        .process_sync(&input, None, &ProcessOptions::channels(2))
        .unwrap();
    assert_eq!(out.len(), 900);
    // every sample settles to 1 after a transient of about order/2 frames
    let settle = 2 * 30;
    for (i, &v) in out.iter().enumerate().skip(settle) {
        assert!((v - 1.0).abs() < 1e-6, "value {i} = {v}");
    }
}

#[test]
fn resampler_timestamps_cover_input_span() {
    // property 8: reinterpolated timestamps stay monotonic and span-preserving
    let p = Pipeline::new();
    p.add_stage("decimate", params!({"factor": 2})).unwrap();
    p.add_stage("movingAverage", params!({"mode": "moving", "windowDuration": 8.0}))
        .unwrap();
    // the movingAverage resolves its duration from reinterpolated timestamps:
    // input at 1000 Hz decimated by 2 -> 2 ms spacing -> window of 4 samples
    let input = vec![1.0f32; 64];
    let out = p
        .process_sync(
            &input,
            None,
            &ProcessOptions::channels(1).with_sample_rate(1000.0),
        )
        .unwrap();
    assert_eq!(out.len(), 32);
    assert!((out[31] - 1.0).abs() < 1e-4);
}

// ═══════════════════════════════════════════════════════════════════════════
// S5: time alignment
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn time_alignment_onto_uniform_grid() {
    let p = Pipeline::new();
    p.add_stage(
        "timeAlignment",
        params!({
            "targetSampleRate": 1000.0,
            "interpolation": "linear",
            "gapPolicy": "interpolate",
            "gapThreshold": 2.0
        }),
    )
    .unwrap();
    let values = [0.0f32, 1.0, 2.0, 3.0, 4.0];
    let ts = [0.0f32, 0.9, 2.1, 3.0, 4.2];
    let out = p
        .process_sync(&values, Some(&ts), &ProcessOptions::channels(1))
        .unwrap();
    assert_eq!(out.len(), 5);
    // linear interpolation of the irregular stream at grid times 0..4 ms
    let expected = [0.0, 1.0833, 1.9167, 3.0, 3.8333];
    for (i, (&got, &want)) in out.iter().zip(&expected).enumerate() {
        assert!((got - want).abs() < 1e-3, "grid {i}: {got} vs {want}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// S6: snapshot round trip
// ═══════════════════════════════════════════════════════════════════════════

fn build_s6_pipeline() -> Pipeline {
    let p = Pipeline::new();
    p.add_stage("movingAverage", params!({"mode": "moving", "windowSize": 4}))
        .unwrap();
    p.add_stage("rectify", params!({"mode": "full"})).unwrap();
    p.add_stage("rms", params!({"mode": "moving", "windowSize": 8}))
        .unwrap();
    p
}

#[test]
fn snapshot_resumes_bit_identically() {
    let opts = ProcessOptions::channels(1);
    let first = noise(1000, 7);
    let second = noise(1000, 8);

    // reference: continuous processing
    let continuous = build_s6_pipeline();
    continuous.process_sync(&first, None, &opts).unwrap();
    let expected = continuous.process_sync(&second, None, &opts).unwrap();

    // snapshot after the first half, restore into a fresh chain
    let original = build_s6_pipeline();
    original.process_sync(&first, None, &opts).unwrap();
    let snapshot = original.save_state().unwrap();

    let restored = build_s6_pipeline();
    assert!(restored.load_state(&snapshot).unwrap());
    let resumed = restored.process_sync(&second, None, &opts).unwrap();

    assert_eq!(expected.len(), resumed.len());
    for (i, (a, b)) in expected.iter().zip(&resumed).enumerate() {
        assert_eq!(a.to_bits(), b.to_bits(), "sample {i}");
    }
}

#[test]
fn snapshot_layout_is_validated_before_state() {
    let p = build_s6_pipeline();
    p.process_sync(&noise(64, 9), None, &ProcessOptions::channels(1))
        .unwrap();
    let snapshot = p.save_state().unwrap();

    // count mismatch
    let short = Pipeline::new();
    short
        .add_stage("movingAverage", params!({"mode": "moving", "windowSize": 4}))
        .unwrap();
    assert!(matches!(
        short.load_state(&snapshot),
        Err(sf_core::SfError::StageCountMismatch { .. })
    ));

    // type mismatch at index 1
    let wrong = Pipeline::new();
    wrong
        .add_stage("movingAverage", params!({"mode": "moving", "windowSize": 4}))
        .unwrap();
    wrong.add_stage("square", params!({})).unwrap();
    wrong
        .add_stage("rms", params!({"mode": "moving", "windowSize": 8}))
        .unwrap();
    let err = wrong.load_state(&snapshot).unwrap_err();
    match err {
        sf_core::SfError::StageTypeMismatch { index, .. } => assert_eq!(index, 1),
        other => panic!("unexpected error {other}"),
    }

    // garbage bytes
    let fresh = build_s6_pipeline();
    assert!(matches!(
        fresh.load_state(&[0xFF, 0x01, 0x02]),
        Err(sf_core::SfError::CorruptSnapshot(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL / SHAPE PROPAGATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn non_resizing_chain_preserves_shape() {
    // property 2
    let p = Pipeline::new();
    p.add_stage("rectify", params!({"mode": "full"})).unwrap();
    p.add_stage("square", params!({})).unwrap();
    p.add_stage("kalmanFilter", params!({})).unwrap();
    let input = noise(300, 10);
    let out = p
        .process_sync(&input, None, &ProcessOptions::channels(3))
        .unwrap();
    assert_eq!(out.len(), input.len());
}

#[test]
fn channel_select_then_stats() {
    let p = Pipeline::new();
    p.add_stage("channelSelect", params!({"channel": 1})).unwrap();
    p.add_stage("movingAverage", params!({"mode": "moving", "windowSize": 2}))
        .unwrap();
    // ch0 = 0, ch1 = ramp
    let input: Vec<f32> = (0..8).flat_map(|i| [0.0, i as f32]).collect();
    let out = p
        .process_sync(&input, None, &ProcessOptions::channels(2))
        .unwrap();
    assert_eq!(out.len(), 8);
    assert_eq!(out[0], 0.0);
    assert_eq!(out[3], 2.5);
}

#[test]
fn matrix_transform_changes_channel_count() {
    let p = Pipeline::new();
    p.add_stage(
        "pcaTransform",
        params!({
            "matrix": [0.5, 0.5, 1.0, -1.0],
            "mean": [0.0, 0.0],
            "numChannels": 2,
            "numComponents": 2
        }),
    )
    .unwrap();
    p.add_stage("channelSelect", params!({"channel": 1})).unwrap();
    let input = [1.0f32, 3.0, 5.0, 5.0];
    let out = p
        .process_sync(&input, None, &ProcessOptions::channels(2))
        .unwrap();
    // component 1 = x0 - x1 per frame
    assert_eq!(out, vec![-2.0, 0.0]);
}

#[test]
fn stft_chain_emits_frames() {
    let p = Pipeline::new();
    p.add_stage(
        "stft",
        params!({"windowSize": 32, "hopSize": 8, "window": "hann", "output": "power"}),
    )
    .unwrap();
    let input = noise(128, 11);
    let out = p
        .process_sync(
            &input,
            None,
            &ProcessOptions::channels(1).with_sample_rate(8000.0),
        )
        .unwrap();
    // 128 / 8 = 16 frames of 17 bins
    assert_eq!(out.len(), 16 * 17);
    assert!(out.iter().all(|v| v.is_finite() && *v >= 0.0));
}

// ═══════════════════════════════════════════════════════════════════════════
// CONCURRENCY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn add_stage_succeeds_after_process_resolves() {
    // property 9
    let p = Pipeline::new();
    p.add_stage("square", params!({})).unwrap();
    let handle = p
        .process(&noise(4096, 12), None, &ProcessOptions::channels(1))
        .unwrap();
    handle.wait().unwrap();
    p.add_stage("rectify", params!({"mode": "full"})).unwrap();
    assert_eq!(p.list_state().unwrap().stage_count, 2);
}

#[test]
fn process_while_busy_fails_fast() {
    use sf_core::SfError;
    let p = Pipeline::new();
    p.add_stage("movingAverage", params!({"mode": "moving", "windowSize": 64}))
        .unwrap();
    // long enough to still be in flight when the second call arrives
    let big = noise(2_000_000, 13);
    let handle = p.process(&big, None, &ProcessOptions::channels(1)).unwrap();
    let second = p.process_sync(&[1.0], None, &ProcessOptions::channels(1));
    assert!(matches!(second, Err(SfError::Busy)));
    handle.wait().unwrap();
    // and the flag is clear again
    p.process_sync(&[1.0], None, &ProcessOptions::channels(1))
        .unwrap();
}

#[test]
fn raw_coefficient_filter_stage() {
    let p = Pipeline::new();
    // b = [0.5, 0.5], a = [1] degenerates to a two-tap FIR
    p.add_filter_stage(&[0.5, 0.5], &[1.0]).unwrap();
    let out = p
        .process_sync(&[1.0, 0.0, 0.0], None, &ProcessOptions::channels(1))
        .unwrap();
    assert!((out[0] - 0.5).abs() < 1e-6);
    assert!((out[1] - 0.5).abs() < 1e-6);
    assert!(out[2].abs() < 1e-6);
    // unstable denominators are rejected up front
    assert!(p.add_filter_stage(&[1.0], &[1.0, -2.0]).is_err());
    assert_eq!(p.list_state().unwrap().stage_count, 1);
}

#[test]
fn clear_state_resets_the_stream() {
    let p = Pipeline::new();
    p.add_stage("cumulativeMovingAverage", params!({})).unwrap();
    let opts = ProcessOptions::channels(1);
    p.process_sync(&[10.0, 10.0], None, &opts).unwrap();
    p.clear_state().unwrap();
    let out = p.process_sync(&[2.0], None, &opts).unwrap();
    // after clear the running mean restarts
    assert_eq!(out, vec![2.0]);
}
