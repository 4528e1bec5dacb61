//! FFT engine
//!
//! Fixed-size transform engine. Power-of-two sizes run an iterative radix-2
//! Cooley-Tukey with a precomputed bit-reversal table and cached twiddle
//! factors; other sizes fall back to the O(N^2) DFT over a precomputed
//! twiddle row. Real input uses the half-size packing trick: two real lanes
//! ride one complex transform of length N/2 and are untangled afterwards.

use num_complex::Complex;
use sf_core::{Sample, SfError, SfResult};
use std::f64::consts::PI;

use crate::simd;

/// Fixed-size FFT engine. All operations validate buffer lengths against the
/// construction size.
#[derive(Debug)]
pub struct FftEngine {
    size: usize,
    pow2: bool,
    /// Bit-reversal permutation (power-of-two only)
    bitrev: Vec<u32>,
    /// Forward twiddles e^(-2*pi*i*k/N), k in 0..N/2 (power-of-two only)
    twiddles: Vec<Complex<Sample>>,
    /// Untangling twiddles for the real transform, k in 0..=N/2
    rfft_twiddles: Vec<Complex<Sample>>,
    /// Half-size engine driving the packed real transform
    half: Option<Box<FftEngine>>,
    /// Full twiddle row for the DFT fallback, f64 for accuracy
    dft_table: Vec<Complex<f64>>,
}

impl FftEngine {
    pub fn new(size: usize) -> SfResult<Self> {
        if size == 0 {
            return Err(SfError::invalid("FFT size must be non-zero"));
        }
        let pow2 = size.is_power_of_two();

        let (bitrev, twiddles) = if pow2 {
            let bits = size.trailing_zeros();
            let mut bitrev = vec![0u32; size];
            for (i, r) in bitrev.iter_mut().enumerate() {
                *r = (i as u32).reverse_bits() >> (32 - bits.max(1)) as u32;
            }
            if size == 1 {
                bitrev[0] = 0;
            }
            let twiddles = (0..size / 2)
                .map(|k| {
                    let ang = -2.0 * PI * k as f64 / size as f64;
                    Complex::new(ang.cos() as Sample, ang.sin() as Sample)
                })
                .collect();
            (bitrev, twiddles)
        } else {
            (Vec::new(), Vec::new())
        };

        let rfft_twiddles = (0..=size / 2)
            .map(|k| {
                let ang = -2.0 * PI * k as f64 / size as f64;
                Complex::new(ang.cos() as Sample, ang.sin() as Sample)
            })
            .collect();

        let half = if pow2 && size >= 2 {
            Some(Box::new(FftEngine::new(size / 2)?))
        } else {
            None
        };

        let dft_table = if pow2 {
            Vec::new()
        } else {
            (0..size)
                .map(|k| {
                    let ang = -2.0 * PI * k as f64 / size as f64;
                    Complex::new(ang.cos(), ang.sin())
                })
                .collect()
        };

        Ok(Self {
            size,
            pow2,
            bitrev,
            twiddles,
            rfft_twiddles,
            half,
            dft_table,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_power_of_two(&self) -> bool {
        self.pow2
    }

    /// Number of bins produced by the real transform: N/2 + 1.
    #[inline]
    pub fn real_bins(&self) -> usize {
        self.size / 2 + 1
    }

    fn check_len(&self, len: usize, what: &str, expected: usize) -> SfResult<()> {
        if len != expected {
            return Err(SfError::invalid(format!(
                "{what} length {len} does not match FFT size (expected {expected})"
            )));
        }
        Ok(())
    }

    // ── complex transforms ──────────────────────────────────────────────

    /// Forward complex FFT.
    pub fn fft(&self, input: &[Complex<Sample>], output: &mut [Complex<Sample>]) -> SfResult<()> {
        self.check_len(input.len(), "input", self.size)?;
        self.check_len(output.len(), "output", self.size)?;
        if self.pow2 {
            for (i, o) in output.iter_mut().enumerate() {
                *o = input[self.bitrev[i] as usize];
            }
            self.butterflies(output);
        } else {
            self.dft(input, output, false);
        }
        Ok(())
    }

    /// Inverse complex FFT; divides by N.
    pub fn ifft(&self, input: &[Complex<Sample>], output: &mut [Complex<Sample>]) -> SfResult<()> {
        self.check_len(input.len(), "input", self.size)?;
        self.check_len(output.len(), "output", self.size)?;
        if self.pow2 {
            // conjugate trick reuses the forward tables
            for (i, o) in output.iter_mut().enumerate() {
                *o = input[self.bitrev[i] as usize].conj();
            }
            self.butterflies(output);
            let scale = 1.0 / self.size as Sample;
            for o in output.iter_mut() {
                *o = o.conj() * scale;
            }
        } else {
            self.dft(input, output, true);
            let scale = 1.0 / self.size as Sample;
            for o in output.iter_mut() {
                *o = *o * scale;
            }
        }
        Ok(())
    }

    /// Iterative radix-2 butterflies over bit-reversed data.
    fn butterflies(&self, data: &mut [Complex<Sample>]) {
        let n = self.size;
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            let mut start = 0;
            while start < n {
                for k in 0..half {
                    let w = self.twiddles[k * stride];
                    let a = data[start + k];
                    let b = data[start + k + half] * w;
                    data[start + k] = a + b;
                    data[start + k + half] = a - b;
                }
                start += len;
            }
            len <<= 1;
        }
    }

    /// O(N^2) DFT fallback, f64 accumulation.
    fn dft(&self, input: &[Complex<Sample>], output: &mut [Complex<Sample>], inverse: bool) {
        let n = self.size;
        for (k, out) in output.iter_mut().enumerate() {
            let mut re = 0.0f64;
            let mut im = 0.0f64;
            for (j, x) in input.iter().enumerate() {
                let w = self.dft_table[(j * k) % n];
                let (wr, wi) = if inverse { (w.re, -w.im) } else { (w.re, w.im) };
                let xr = x.re as f64;
                let xi = x.im as f64;
                re += xr * wr - xi * wi;
                im += xr * wi + xi * wr;
            }
            *out = Complex::new(re as Sample, im as Sample);
        }
    }

    // ── real transforms ─────────────────────────────────────────────────

    /// Real-input forward transform producing N/2 + 1 bins.
    pub fn rfft(&self, input: &[Sample], output: &mut [Complex<Sample>]) -> SfResult<()> {
        self.check_len(input.len(), "input", self.size)?;
        self.check_len(output.len(), "output", self.real_bins())?;
        let n = self.size;
        if n == 1 {
            output[0] = Complex::new(input[0], 0.0);
            return Ok(());
        }
        if let Some(half) = &self.half {
            let n2 = n / 2;
            // pack two real lanes into one complex transform of length N/2
            let packed: Vec<Complex<Sample>> = (0..n2)
                .map(|k| Complex::new(input[2 * k], input[2 * k + 1]))
                .collect();
            let mut z = vec![Complex::new(0.0, 0.0); n2];
            half.fft(&packed, &mut z)?;
            for k in 0..=n2 {
                let zk = if k == n2 { z[0] } else { z[k] };
                let zr = z[(n2 - k) % n2].conj();
                let even = (zk + zr) * 0.5;
                let odd = (zk - zr) * Complex::new(0.0, -0.5);
                output[k] = even + self.rfft_twiddles[k] * odd;
            }
        } else {
            // rDFT fallback: full complex DFT of the real signal
            let full_in: Vec<Complex<Sample>> =
                input.iter().map(|&x| Complex::new(x, 0.0)).collect();
            let mut full_out = vec![Complex::new(0.0, 0.0); n];
            self.dft(&full_in, &mut full_out, false);
            output.copy_from_slice(&full_out[..self.real_bins()]);
        }
        Ok(())
    }

    /// Inverse of [`FftEngine::rfft`]; writes N real samples.
    pub fn irfft(&self, spec: &[Complex<Sample>], output: &mut [Sample]) -> SfResult<()> {
        self.check_len(spec.len(), "spectrum", self.real_bins())?;
        self.check_len(output.len(), "output", self.size)?;
        let n = self.size;
        if n == 1 {
            output[0] = spec[0].re;
            return Ok(());
        }
        if let Some(half) = &self.half {
            let n2 = n / 2;
            let mut z = vec![Complex::new(0.0, 0.0); n2];
            for (k, zk) in z.iter_mut().enumerate() {
                let xk = spec[k];
                let xr = spec[n2 - k].conj();
                let even = (xk + xr) * 0.5;
                let wodd = (xk - xr) * 0.5;
                let odd = self.rfft_twiddles[k].conj() * wodd;
                *zk = even + odd * Complex::new(0.0, 1.0);
            }
            let mut unpacked = vec![Complex::new(0.0, 0.0); n2];
            half.ifft(&z, &mut unpacked)?;
            for k in 0..n2 {
                output[2 * k] = unpacked[k].re;
                output[2 * k + 1] = unpacked[k].im;
            }
        } else {
            // rebuild the full Hermitian spectrum, inverse DFT, keep reals
            let mut full = vec![Complex::new(0.0, 0.0); n];
            for (k, &s) in spec.iter().enumerate() {
                full[k] = s;
                if k > 0 && k < n - k {
                    full[n - k] = s.conj();
                }
            }
            let mut time = vec![Complex::new(0.0, 0.0); n];
            self.dft(&full, &mut time, true);
            let scale = 1.0 / n as Sample;
            for (o, t) in output.iter_mut().zip(&time) {
                *o = t.re * scale;
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SPECTRUM HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// `out[i] = |spec[i]|`
pub fn magnitude(spec: &[Complex<Sample>], out: &mut [Sample]) {
    simd::complex_magnitude(spec, out);
}

/// `out[i] = |spec[i]|^2`
pub fn power(spec: &[Complex<Sample>], out: &mut [Sample]) {
    simd::complex_power(spec, out);
}

/// `out[i] = arg(spec[i])`
pub fn phase(spec: &[Complex<Sample>], out: &mut [Sample]) {
    let n = spec.len().min(out.len());
    for i in 0..n {
        out[i] = spec[i].im.atan2(spec[i].re);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn noise(n: usize, seed: u64) -> Vec<Sample> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n).map(|_| rng.random::<Sample>() * 2.0 - 1.0).collect()
    }

    fn max_err(a: &[Sample], b: &[Sample]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn fft_matches_naive_dft() {
        let n = 16;
        let engine = FftEngine::new(n).unwrap();
        let raw = noise(2 * n, 1);
        let input: Vec<Complex<Sample>> =
            raw.chunks(2).map(|c| Complex::new(c[0], c[1])).collect();
        let mut out = vec![Complex::new(0.0, 0.0); n];
        engine.fft(&input, &mut out).unwrap();

        for k in 0..n {
            let mut expect = Complex::new(0.0f64, 0.0f64);
            for (j, x) in input.iter().enumerate() {
                let ang = -2.0 * PI * (j * k) as f64 / n as f64;
                expect += Complex::new(x.re as f64, x.im as f64)
                    * Complex::new(ang.cos(), ang.sin());
            }
            assert!((out[k].re as f64 - expect.re).abs() < 1e-4, "bin {k}");
            assert!((out[k].im as f64 - expect.im).abs() < 1e-4, "bin {k}");
        }
    }

    #[test]
    fn complex_round_trip() {
        let n = 256;
        let engine = FftEngine::new(n).unwrap();
        let raw = noise(2 * n, 2);
        let input: Vec<Complex<Sample>> =
            raw.chunks(2).map(|c| Complex::new(c[0], c[1])).collect();
        let mut spec = vec![Complex::new(0.0, 0.0); n];
        let mut back = vec![Complex::new(0.0, 0.0); n];
        engine.fft(&input, &mut spec).unwrap();
        engine.ifft(&spec, &mut back).unwrap();
        for i in 0..n {
            assert_abs_diff_eq!(input[i].re, back[i].re, epsilon = 1e-4);
            assert_abs_diff_eq!(input[i].im, back[i].im, epsilon = 1e-4);
        }
    }

    #[test]
    fn real_round_trip_two_tones() {
        // cos + half-amplitude sin, the classic smoke signal
        let n = 1024;
        let engine = FftEngine::new(n).unwrap();
        let x: Vec<Sample> = (0..n)
            .map(|i| {
                let t = i as f64 / n as f64;
                ((2.0 * PI * 5.0 * t).cos() + 0.5 * (2.0 * PI * 50.0 * t).sin()) as Sample
            })
            .collect();
        let mut spec = vec![Complex::new(0.0, 0.0); engine.real_bins()];
        let mut back = vec![0.0; n];
        engine.rfft(&x, &mut spec).unwrap();
        engine.irfft(&spec, &mut back).unwrap();
        assert!(max_err(&x, &back) < 1e-5);

        // the two tones land in their bins
        let mut mag = vec![0.0; spec.len()];
        magnitude(&spec, &mut mag);
        assert!(mag[5] > mag[4] * 10.0 && mag[5] > mag[6] * 10.0);
        assert!(mag[50] > mag[49] * 10.0 && mag[50] > mag[51] * 10.0);
    }

    #[test]
    fn rfft_matches_full_fft() {
        let n = 64;
        let engine = FftEngine::new(n).unwrap();
        let x = noise(n, 3);
        let mut rspec = vec![Complex::new(0.0, 0.0); engine.real_bins()];
        engine.rfft(&x, &mut rspec).unwrap();

        let input: Vec<Complex<Sample>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let mut full = vec![Complex::new(0.0, 0.0); n];
        engine.fft(&input, &mut full).unwrap();

        for k in 0..engine.real_bins() {
            assert!((rspec[k] - full[k]).norm() < 1e-3, "bin {k}");
        }
    }

    #[test]
    fn non_power_of_two_round_trip() {
        let n = 12;
        let engine = FftEngine::new(n).unwrap();
        assert!(!engine.is_power_of_two());
        let x = noise(n, 4);
        let mut spec = vec![Complex::new(0.0, 0.0); engine.real_bins()];
        let mut back = vec![0.0; n];
        engine.rfft(&x, &mut spec).unwrap();
        engine.irfft(&spec, &mut back).unwrap();
        assert!(max_err(&x, &back) < 1e-5);
    }

    #[test]
    fn length_mismatch_is_invalid() {
        let engine = FftEngine::new(8).unwrap();
        let input = vec![Complex::new(0.0, 0.0); 4];
        let mut out = vec![Complex::new(0.0, 0.0); 8];
        assert!(matches!(
            engine.fft(&input, &mut out),
            Err(SfError::InvalidArgument(_))
        ));
    }
}
