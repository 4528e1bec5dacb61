//! Mel filterbank construction and DCT-II for cepstral features
//!
//! The engine's mel-spectrogram and MFCC stages consume a filterbank matrix
//! supplied as a stage parameter; this module provides the reference builder
//! (HTK mel scale, triangular filters), the orthonormal DCT-II and the
//! sinusoidal lifter used on cepstra.

use sf_core::{Sample, SfError, SfResult};
use std::f64::consts::PI;

/// HTK mel scale
#[inline]
pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

#[inline]
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank, row-major `num_bands x num_bins`.
///
/// `num_bins` is the spectrum length (N/2 + 1 for an N-point real FFT).
pub fn mel_filterbank(
    num_bands: usize,
    num_bins: usize,
    sample_rate: f64,
) -> SfResult<Vec<Sample>> {
    if num_bands == 0 || num_bins < 2 {
        return Err(SfError::invalid(
            "mel filterbank needs at least one band and two bins",
        ));
    }
    if sample_rate <= 0.0 {
        return Err(SfError::invalid("sample rate must be positive"));
    }
    let nyquist = sample_rate / 2.0;
    let mel_max = hz_to_mel(nyquist);
    // band edges: num_bands + 2 points, equally spaced in mel
    let edges_hz: Vec<f64> = (0..num_bands + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (num_bands + 1) as f64))
        .collect();
    let hz_per_bin = nyquist / (num_bins - 1) as f64;

    let mut bank = vec![0.0 as Sample; num_bands * num_bins];
    for b in 0..num_bands {
        let (lo, center, hi) = (edges_hz[b], edges_hz[b + 1], edges_hz[b + 2]);
        for bin in 0..num_bins {
            let f = bin as f64 * hz_per_bin;
            let w = if f <= lo || f >= hi {
                0.0
            } else if f <= center {
                (f - lo) / (center - lo)
            } else {
                (hi - f) / (hi - center)
            };
            bank[b * num_bins + bin] = w as Sample;
        }
    }
    Ok(bank)
}

/// Orthonormal DCT-II of `input`, writing the first `out.len()` coefficients.
pub fn dct_ii(input: &[Sample], out: &mut [Sample]) {
    let n = input.len();
    if n == 0 {
        out.fill(0.0);
        return;
    }
    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();
    for (k, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for (j, &x) in input.iter().enumerate() {
            acc += x as f64 * (PI * (j as f64 + 0.5) * k as f64 / n as f64).cos();
        }
        *o = (acc * if k == 0 { scale0 } else { scale }) as Sample;
    }
}

/// Sinusoidal liftering: `c[k] *= 1 + (L/2) sin(pi k / L)`.
pub fn lifter(cepstra: &mut [Sample], coefficient: f64) {
    if coefficient <= 0.0 {
        return;
    }
    for (k, c) in cepstra.iter_mut().enumerate() {
        let w = 1.0 + coefficient / 2.0 * (PI * k as f64 / coefficient).sin();
        *c = ((*c as f64) * w) as Sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 100.0, 440.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn filterbank_rows_cover_spectrum() {
        let bank = mel_filterbank(26, 257, 16000.0).unwrap();
        assert_eq!(bank.len(), 26 * 257);
        // every band has some mass, every weight in [0,1]
        for b in 0..26 {
            let row = &bank[b * 257..(b + 1) * 257];
            assert!(row.iter().any(|&w| w > 0.0), "band {b} empty");
            assert!(row.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }

    #[test]
    fn dct_of_constant_is_dc_only() {
        let input = vec![1.0; 16];
        let mut out = vec![0.0; 8];
        dct_ii(&input, &mut out);
        assert!((out[0] - 4.0).abs() < 1e-5); // sqrt(16) * 1
        for &c in &out[1..] {
            assert!(c.abs() < 1e-5);
        }
    }

    #[test]
    fn lifter_leaves_c0_alone() {
        let mut c = vec![1.0; 13];
        lifter(&mut c, 22.0);
        assert!((c[0] - 1.0).abs() < 1e-7);
        assert!(c[1] > 1.0);
    }
}
