//! IIR filter core: direct-form-I with classic designs
//!
//! `y[n] = (sum(b_k x[n-k]) - sum(a_k y[n-k])) / a_0`, per-instance x/y
//! histories in f64. Designs cover bilinear first-order sections,
//! Butterworth, Chebyshev-I (cascaded biquads from the analog prototype,
//! flattened) and the RBJ biquad cookbook.

use nalgebra::DMatrix;
use num_complex::Complex;
use sf_core::{Sample, SfError, SfResult};
use std::f64::consts::PI;

/// Filter response selector for the classic designs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IirBand {
    Lowpass,
    Highpass,
}

/// IIR filter with direct-form-I state.
#[derive(Debug, Clone)]
pub struct IirFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    x_hist: Vec<f64>,
    y_hist: Vec<f64>,
}

impl IirFilter {
    /// Build from raw coefficient arrays. `a[0]` must be non-zero.
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> SfResult<Self> {
        if b.is_empty() || a.is_empty() {
            return Err(SfError::invalid("IIR coefficient arrays must be non-empty"));
        }
        if a[0] == 0.0 {
            return Err(SfError::invalid("IIR a[0] must be non-zero"));
        }
        let nb = b.len();
        let na = a.len();
        Ok(Self {
            b,
            a,
            x_hist: vec![0.0; nb],
            y_hist: vec![0.0; na.saturating_sub(1).max(1)],
        })
    }

    /// Build and reject unstable designs.
    pub fn new_checked(b: Vec<f64>, a: Vec<f64>) -> SfResult<Self> {
        let f = Self::new(b, a)?;
        if !f.is_stable() {
            return Err(SfError::Unstable);
        }
        Ok(f)
    }

    pub fn numerator(&self) -> &[f64] {
        &self.b
    }

    pub fn denominator(&self) -> &[f64] {
        &self.a
    }

    /// One sample through direct-form-I.
    #[inline]
    pub fn process_sample(&mut self, x: Sample) -> Sample {
        // shift x history
        for i in (1..self.x_hist.len()).rev() {
            self.x_hist[i] = self.x_hist[i - 1];
        }
        self.x_hist[0] = x as f64;

        let mut acc = 0.0f64;
        for (k, &bk) in self.b.iter().enumerate() {
            acc += bk * self.x_hist[k];
        }
        for (k, &ak) in self.a.iter().enumerate().skip(1) {
            acc -= ak * self.y_hist[k - 1];
        }
        let y = acc / self.a[0];

        for i in (1..self.y_hist.len()).rev() {
            self.y_hist[i] = self.y_hist[i - 1];
        }
        self.y_hist[0] = y;
        y as Sample
    }

    /// Batch processing; `stateless` runs from zero histories and leaves the
    /// retained state untouched.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample], stateless: bool) {
        let n = input.len().min(output.len());
        if stateless {
            let saved_x = self.x_hist.clone();
            let saved_y = self.y_hist.clone();
            self.x_hist.fill(0.0);
            self.y_hist.fill(0.0);
            for i in 0..n {
                output[i] = self.process_sample(input[i]);
            }
            self.x_hist = saved_x;
            self.y_hist = saved_y;
        } else {
            for i in 0..n {
                output[i] = self.process_sample(input[i]);
            }
        }
    }

    pub fn reset(&mut self) {
        self.x_hist.fill(0.0);
        self.y_hist.fill(0.0);
    }

    /// True iff every pole lies strictly inside the unit circle.
    ///
    /// Orders up to two use the explicit quadratic roots; higher orders read
    /// the eigenvalues of the companion matrix.
    pub fn is_stable(&self) -> bool {
        // strip trailing zero denominator coefficients
        let mut a: Vec<f64> = self.a.iter().map(|&v| v / self.a[0]).collect();
        while a.len() > 1 && a.last() == Some(&0.0) {
            a.pop();
        }
        let order = a.len() - 1;
        match order {
            0 => true,
            1 => a[1].abs() < 1.0,
            2 => {
                let (a1, a2) = (a[1], a[2]);
                let disc = a1 * a1 - 4.0 * a2;
                if disc >= 0.0 {
                    let r = disc.sqrt();
                    ((-a1 + r) / 2.0).abs() < 1.0 && ((-a1 - r) / 2.0).abs() < 1.0
                } else {
                    // complex pair: |z|^2 = a2
                    a2 < 1.0
                }
            }
            _ => {
                let mut companion = DMatrix::<f64>::zeros(order, order);
                for i in 0..order {
                    companion[(0, i)] = -a[i + 1];
                }
                for i in 1..order {
                    companion[(i, i - 1)] = 1.0;
                }
                companion
                    .complex_eigenvalues()
                    .iter()
                    .all(|z| z.norm() < 1.0)
            }
        }
    }

    /// x/y histories for snapshotting.
    pub fn snapshot_state(&self) -> (Vec<Sample>, Vec<Sample>) {
        (
            self.x_hist.iter().map(|&v| v as Sample).collect(),
            self.y_hist.iter().map(|&v| v as Sample).collect(),
        )
    }

    pub fn restore_state(&mut self, x: &[Sample], y: &[Sample]) -> SfResult<()> {
        if x.len() != self.x_hist.len() || y.len() != self.y_hist.len() {
            return Err(SfError::CorruptSnapshot(
                "IIR history length mismatch".to_string(),
            ));
        }
        for (d, &s) in self.x_hist.iter_mut().zip(x) {
            *d = s as f64;
        }
        for (d, &s) in self.y_hist.iter_mut().zip(y) {
            *d = s as f64;
        }
        Ok(())
    }

    // ── designs ─────────────────────────────────────────────────────────

    /// Bilinear-transformed first-order RC section.
    pub fn first_order(band: IirBand, cutoff_hz: f64, sample_rate: f64) -> SfResult<Self> {
        check_cutoff(cutoff_hz, sample_rate)?;
        let wc = (PI * cutoff_hz / sample_rate).tan();
        match band {
            IirBand::Lowpass => {
                let b0 = wc / (1.0 + wc);
                Self::new_checked(vec![b0, b0], vec![1.0, (wc - 1.0) / (1.0 + wc)])
            }
            IirBand::Highpass => {
                let b0 = 1.0 / (1.0 + wc);
                Self::new_checked(vec![b0, -b0], vec![1.0, (wc - 1.0) / (1.0 + wc)])
            }
        }
    }

    /// Butterworth design via analog poles and the bilinear transform.
    pub fn butterworth(
        band: IirBand,
        order: usize,
        cutoff_hz: f64,
        sample_rate: f64,
    ) -> SfResult<Self> {
        if order == 0 || order > 16 {
            return Err(SfError::invalid(format!(
                "Butterworth order {order} must be in 1..=16"
            )));
        }
        check_cutoff(cutoff_hz, sample_rate)?;
        // prewarped analog cutoff (normalized to fs = 1, bilinear k = 2)
        let wc = 2.0 * (PI * cutoff_hz / sample_rate).tan();

        // analog prototype poles on the unit circle, mapped to the cutoff
        let analog_poles: Vec<Complex<f64>> = (0..order)
            .map(|k| {
                let theta = PI * (2.0 * k as f64 + order as f64 + 1.0) / (2.0 * order as f64);
                let p = Complex::new(theta.cos(), theta.sin());
                match band {
                    IirBand::Lowpass => p * wc,
                    IirBand::Highpass => Complex::new(wc, 0.0) / p,
                }
            })
            .collect();

        let (z_poles, gain_freq) = bilinear_poles(&analog_poles, band);
        let zero = match band {
            IirBand::Lowpass => -1.0,
            IirBand::Highpass => 1.0,
        };
        let z_zeros = vec![Complex::new(zero, 0.0); order];

        build_from_roots(&z_zeros, &z_poles, gain_freq)
    }

    /// Chebyshev type-I design: analog prototype biquads, bilinear transform,
    /// flattened into one numerator/denominator pair.
    pub fn chebyshev1(
        band: IirBand,
        order: usize,
        ripple_db: f64,
        cutoff_hz: f64,
        sample_rate: f64,
    ) -> SfResult<Self> {
        if order == 0 || order > 16 {
            return Err(SfError::invalid(format!(
                "Chebyshev order {order} must be in 1..=16"
            )));
        }
        if ripple_db <= 0.0 {
            return Err(SfError::invalid("Chebyshev ripple must be positive dB"));
        }
        check_cutoff(cutoff_hz, sample_rate)?;
        let wc = 2.0 * (PI * cutoff_hz / sample_rate).tan();

        let eps = (10.0f64.powf(ripple_db / 10.0) - 1.0).sqrt();
        let mu = (1.0 / eps).asinh() / order as f64;
        let analog_poles: Vec<Complex<f64>> = (0..order)
            .map(|k| {
                let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
                // prototype poles on an ellipse
                let p = Complex::new(-mu.sinh() * theta.sin(), mu.cosh() * theta.cos());
                match band {
                    IirBand::Lowpass => p * wc,
                    IirBand::Highpass => Complex::new(wc, 0.0) / p,
                }
            })
            .collect();

        let (z_poles, gain_freq) = bilinear_poles(&analog_poles, band);
        let zero = match band {
            IirBand::Lowpass => -1.0,
            IirBand::Highpass => 1.0,
        };
        let z_zeros = vec![Complex::new(zero, 0.0); order];

        let mut filter = build_from_roots(&z_zeros, &z_poles, gain_freq)?;
        // even-order Chebyshev passband sits eps below unity at DC
        if order % 2 == 0 {
            let g = 1.0 / (1.0 + eps * eps).sqrt();
            for bk in &mut filter.b {
                *bk *= g;
            }
        }
        Ok(filter)
    }

    /// RBJ cookbook biquad.
    pub fn biquad(kind: BiquadKind, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> SfResult<Self> {
        check_cutoff(freq, sample_rate)?;
        if q <= 0.0 {
            return Err(SfError::invalid("biquad Q must be positive"));
        }
        let (b, a) = biquad_coefficients(kind, freq, q, gain_db, sample_rate);
        Self::new_checked(b, a)
    }
}

/// RBJ biquad shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peaking,
    LowShelf,
    HighShelf,
}

impl BiquadKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lowpass" => Some(Self::Lowpass),
            "highpass" => Some(Self::Highpass),
            "bandpass" => Some(Self::Bandpass),
            "notch" | "bandstop" => Some(Self::Notch),
            "peaking" | "peak" => Some(Self::Peaking),
            "lowshelf" => Some(Self::LowShelf),
            "highshelf" => Some(Self::HighShelf),
            _ => None,
        }
    }
}

fn check_cutoff(cutoff_hz: f64, sample_rate: f64) -> SfResult<()> {
    if sample_rate <= 0.0 {
        return Err(SfError::invalid("sample rate must be positive"));
    }
    if cutoff_hz <= 0.0 || cutoff_hz >= sample_rate / 2.0 {
        return Err(SfError::invalid(format!(
            "cutoff {cutoff_hz} Hz must lie below Nyquist ({} Hz)",
            sample_rate / 2.0
        )));
    }
    Ok(())
}

/// Map analog poles through the bilinear transform (k = 2 for fs-normalized
/// prototypes) and pick the frequency where the passband gain is normalized.
fn bilinear_poles(analog: &[Complex<f64>], band: IirBand) -> (Vec<Complex<f64>>, f64) {
    let k = 2.0;
    let z: Vec<Complex<f64>> = analog
        .iter()
        .map(|&s| (Complex::new(k, 0.0) + s) / (Complex::new(k, 0.0) - s))
        .collect();
    // normalize lowpass at DC (z = 1), highpass at Nyquist (z = -1)
    let freq = match band {
        IirBand::Lowpass => 0.0,
        IirBand::Highpass => PI,
    };
    (z, freq)
}

/// Expand zeros/poles into b/a polynomials and normalize the gain to unity
/// at `omega` (radians/sample).
fn build_from_roots(
    zeros: &[Complex<f64>],
    poles: &[Complex<f64>],
    omega: f64,
) -> SfResult<IirFilter> {
    let b = poly_from_roots(zeros);
    let a = poly_from_roots(poles);

    // evaluate H at z = e^{j omega}
    let zinv = Complex::new(omega.cos(), -omega.sin());
    let eval = |coeffs: &[f64]| -> Complex<f64> {
        let mut acc = Complex::new(0.0, 0.0);
        let mut zp = Complex::new(1.0, 0.0);
        for &c in coeffs {
            acc += zp * c;
            zp *= zinv;
        }
        acc
    };
    let hb = eval(&b);
    let ha = eval(&a);
    if hb.norm() < 1e-300 {
        return Err(SfError::NumericFailure(
            "degenerate design: numerator vanishes at the normalization frequency".to_string(),
        ));
    }
    let gain = (ha / hb).norm();
    let b: Vec<f64> = b.into_iter().map(|v| v * gain).collect();

    IirFilter::new_checked(b, a)
}

/// Real polynomial coefficients (descending powers of z^-1, i.e. c[0] +
/// c[1] z^-1 + ...) from a set of complex roots closed under conjugation.
fn poly_from_roots(roots: &[Complex<f64>]) -> Vec<f64> {
    let mut poly = vec![Complex::new(1.0, 0.0)];
    for &r in roots {
        let mut next = vec![Complex::new(0.0, 0.0); poly.len() + 1];
        for (i, &c) in poly.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * r;
        }
        poly = next;
    }
    poly.into_iter().map(|c| c.re).collect()
}

/// RBJ cookbook coefficients, normalized by a0.
pub fn biquad_coefficients(
    kind: BiquadKind,
    freq: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
) -> (Vec<f64>, Vec<f64>) {
    let omega = 2.0 * PI * freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let alpha = sin_omega / (2.0 * q);
    let amp = 10.0f64.powf(gain_db / 40.0);

    let (b0, b1, b2, a0, a1, a2) = match kind {
        BiquadKind::Lowpass => (
            (1.0 - cos_omega) / 2.0,
            1.0 - cos_omega,
            (1.0 - cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        ),
        BiquadKind::Highpass => (
            (1.0 + cos_omega) / 2.0,
            -(1.0 + cos_omega),
            (1.0 + cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        ),
        BiquadKind::Bandpass => (
            alpha,
            0.0,
            -alpha,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        ),
        BiquadKind::Notch => (
            1.0,
            -2.0 * cos_omega,
            1.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        ),
        BiquadKind::Peaking => (
            1.0 + alpha * amp,
            -2.0 * cos_omega,
            1.0 - alpha * amp,
            1.0 + alpha / amp,
            -2.0 * cos_omega,
            1.0 - alpha / amp,
        ),
        BiquadKind::LowShelf => {
            let two_sqrt_a_alpha = 2.0 * amp.sqrt() * alpha;
            (
                amp * ((amp + 1.0) - (amp - 1.0) * cos_omega + two_sqrt_a_alpha),
                2.0 * amp * ((amp - 1.0) - (amp + 1.0) * cos_omega),
                amp * ((amp + 1.0) - (amp - 1.0) * cos_omega - two_sqrt_a_alpha),
                (amp + 1.0) + (amp - 1.0) * cos_omega + two_sqrt_a_alpha,
                -2.0 * ((amp - 1.0) + (amp + 1.0) * cos_omega),
                (amp + 1.0) + (amp - 1.0) * cos_omega - two_sqrt_a_alpha,
            )
        }
        BiquadKind::HighShelf => {
            let two_sqrt_a_alpha = 2.0 * amp.sqrt() * alpha;
            (
                amp * ((amp + 1.0) + (amp - 1.0) * cos_omega + two_sqrt_a_alpha),
                -2.0 * amp * ((amp - 1.0) + (amp + 1.0) * cos_omega),
                amp * ((amp + 1.0) + (amp - 1.0) * cos_omega - two_sqrt_a_alpha),
                (amp + 1.0) - (amp - 1.0) * cos_omega + two_sqrt_a_alpha,
                2.0 * ((amp - 1.0) - (amp + 1.0) * cos_omega),
                (amp + 1.0) - (amp - 1.0) * cos_omega - two_sqrt_a_alpha,
            )
        }
    };

    (
        vec![b0 / a0, b1 / a0, b2 / a0],
        vec![1.0, a1 / a0, a2 / a0],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_order_lowpass_passes_dc() {
        let mut f = IirFilter::first_order(IirBand::Lowpass, 100.0, 48000.0).unwrap();
        let mut last = 0.0;
        for _ in 0..20000 {
            last = f.process_sample(1.0);
        }
        assert!((last - 1.0).abs() < 1e-3);
    }

    #[test]
    fn butterworth_lowpass_attenuates_high_band() {
        let mut f = IirFilter::butterworth(IirBand::Lowpass, 4, 1000.0, 48000.0).unwrap();
        assert!(f.is_stable());
        // 10 kHz tone, far above cutoff
        let mut peak: f32 = 0.0;
        for i in 0..48000 {
            let x = (2.0 * PI * 10000.0 * i as f64 / 48000.0).sin() as Sample;
            let y = f.process_sample(x);
            if i > 1000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 1e-3, "peak {peak}");
    }

    #[test]
    fn butterworth_dc_gain_is_unity() {
        let mut f = IirFilter::butterworth(IirBand::Lowpass, 3, 2000.0, 48000.0).unwrap();
        let mut last = 0.0;
        for _ in 0..20000 {
            last = f.process_sample(1.0);
        }
        assert!((last - 1.0).abs() < 1e-4, "dc gain {last}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = IirFilter::butterworth(IirBand::Highpass, 2, 1000.0, 48000.0).unwrap();
        let mut last = 1.0;
        for _ in 0..20000 {
            last = f.process_sample(1.0);
        }
        assert!(last.abs() < 1e-5);
    }

    #[test]
    fn chebyshev_is_stable_and_passes_dc_band() {
        let f = IirFilter::chebyshev1(IirBand::Lowpass, 5, 1.0, 1000.0, 48000.0).unwrap();
        assert!(f.is_stable());
    }

    #[test]
    fn unstable_coefficients_rejected() {
        // pole at z = 2
        assert!(matches!(
            IirFilter::new_checked(vec![1.0], vec![1.0, -2.0]),
            Err(SfError::Unstable)
        ));
        // stable pole accepted
        assert!(IirFilter::new_checked(vec![1.0], vec![1.0, -0.5]).is_ok());
    }

    #[test]
    fn stability_test_uses_companion_for_high_order() {
        // (1 - 0.9 z^-1)^3: all poles at 0.9
        let a = vec![1.0, -2.7, 2.43, -0.729];
        let f = IirFilter::new(vec![1.0], a).unwrap();
        assert!(f.is_stable());
        // (1 - 1.1 z^-1)^3: poles at 1.1
        let a = vec![1.0, -3.3, 3.63, -1.331];
        let f = IirFilter::new(vec![1.0], a).unwrap();
        assert!(!f.is_stable());
    }

    #[test]
    fn peaking_biquad_matches_reference_shape() {
        let mut f = IirFilter::biquad(BiquadKind::Peaking, 1000.0, 1.0, 6.0, 48000.0).unwrap();
        // DC should be unaffected by a peaking filter
        let mut last = 0.0;
        for _ in 0..20000 {
            last = f.process_sample(1.0);
        }
        assert!((last - 1.0).abs() < 1e-3);
    }

    #[test]
    fn bounded_input_bounded_output() {
        let mut f = IirFilter::butterworth(IirBand::Lowpass, 6, 4000.0, 48000.0).unwrap();
        assert!(f.is_stable());
        let mut sup: f32 = 0.0;
        for i in 0..100000 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            sup = sup.max(f.process_sample(x).abs());
        }
        assert!(sup.is_finite() && sup < 10.0);
    }

    #[test]
    fn stateless_equals_fresh() {
        let mut f = IirFilter::biquad(BiquadKind::Lowpass, 500.0, 0.707, 0.0, 8000.0).unwrap();
        for _ in 0..50 {
            f.process_sample(0.3);
        }
        let input: Vec<Sample> = (0..32).map(|i| (i as Sample * 0.1).sin()).collect();
        let mut stateless_out = vec![0.0; 32];
        f.process(&input, &mut stateless_out, true);

        let mut g = IirFilter::biquad(BiquadKind::Lowpass, 500.0, 0.707, 0.0, 8000.0).unwrap();
        let mut fresh_out = vec![0.0; 32];
        g.process(&input, &mut fresh_out, false);
        assert_eq!(stateless_out, fresh_out);
    }
}
