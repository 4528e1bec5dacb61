//! FIR filter core and windowed-sinc designs
//!
//! Single-sample and batch processing over a circular delay line, with a
//! stateless mode that runs from a fresh zero delay line and leaves the
//! retained state untouched.

use sf_core::{Sample, SfError, SfResult};

use crate::window::WindowKind;

/// Band shape for windowed-sinc designs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirBand {
    Lowpass,
    Highpass,
    Bandpass,
    Bandstop,
}

/// FIR filter: coefficients plus a circular delay line.
#[derive(Debug, Clone)]
pub struct FirFilter {
    coeffs: Vec<Sample>,
    delay: Vec<f64>,
    pos: usize,
}

impl FirFilter {
    pub fn new(coeffs: Vec<Sample>) -> SfResult<Self> {
        if coeffs.is_empty() {
            return Err(SfError::invalid("FIR filter needs at least one tap"));
        }
        let n = coeffs.len();
        Ok(Self {
            coeffs,
            delay: vec![0.0; n],
            pos: 0,
        })
    }

    /// Windowed-sinc design. `order` is the tap count; cutoffs are in cycles
    /// per sample (0 .. 0.5). Bandpass/bandstop use both cutoffs, the others
    /// only `cutoff1`.
    pub fn design(
        band: FirBand,
        order: usize,
        cutoff1: f64,
        cutoff2: f64,
        window: WindowKind,
    ) -> SfResult<Self> {
        Self::new(design_coefficients(band, order, cutoff1, cutoff2, window)?)
    }

    pub fn coefficients(&self) -> &[Sample] {
        &self.coeffs
    }

    pub fn order(&self) -> usize {
        self.coeffs.len()
    }

    /// One sample through the retained delay line.
    #[inline]
    pub fn process_sample(&mut self, x: Sample) -> Sample {
        self.delay[self.pos] = x as f64;
        let n = self.coeffs.len();
        let mut acc = 0.0f64;
        let mut idx = self.pos;
        for &c in &self.coeffs {
            acc += c as f64 * self.delay[idx];
            idx = if idx == 0 { n - 1 } else { idx - 1 };
        }
        self.pos = (self.pos + 1) % n;
        acc as Sample
    }

    /// Batch processing. `stateless` runs from a fresh zero delay line and
    /// does not modify the retained one.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample], stateless: bool) {
        let n = input.len().min(output.len());
        if stateless {
            let taps = self.coeffs.len();
            let mut delay = vec![0.0f64; taps];
            let mut pos = 0usize;
            for i in 0..n {
                delay[pos] = input[i] as f64;
                let mut acc = 0.0f64;
                let mut idx = pos;
                for &c in &self.coeffs {
                    acc += c as f64 * delay[idx];
                    idx = if idx == 0 { taps - 1 } else { idx - 1 };
                }
                pos = (pos + 1) % taps;
                output[i] = acc as Sample;
            }
        } else {
            for i in 0..n {
                output[i] = self.process_sample(input[i]);
            }
        }
    }

    pub fn reset(&mut self) {
        self.delay.fill(0.0);
        self.pos = 0;
    }

    /// Delay line oldest-to-newest plus write position, for snapshotting.
    pub fn snapshot_state(&self) -> Vec<Sample> {
        let n = self.delay.len();
        // pos is the next write slot, so it holds the oldest sample
        (0..n)
            .map(|i| self.delay[(self.pos + i) % n] as Sample)
            .collect()
    }

    pub fn restore_state(&mut self, state: &[Sample]) -> SfResult<()> {
        let n = self.delay.len();
        if state.len() != n {
            return Err(SfError::CorruptSnapshot(format!(
                "FIR delay line length {} does not match {} taps",
                state.len(),
                n
            )));
        }
        for (i, &s) in state.iter().enumerate() {
            self.delay[(self.pos + i) % n] = s as f64;
        }
        Ok(())
    }
}

/// Windowed-sinc coefficient design shared by the FIR filter and the
/// polyphase resamplers.
pub fn design_coefficients(
    band: FirBand,
    order: usize,
    cutoff1: f64,
    cutoff2: f64,
    window: WindowKind,
) -> SfResult<Vec<Sample>> {
    if order == 0 {
        return Err(SfError::invalid("FIR order must be non-zero"));
    }
    let check = |c: f64, name: &str| -> SfResult<()> {
        if c <= 0.0 || c >= 0.5 {
            return Err(SfError::invalid(format!(
                "{name} {c} must lie in (0, 0.5) cycles/sample"
            )));
        }
        Ok(())
    };
    check(cutoff1, "cutoff")?;
    if matches!(band, FirBand::Bandpass | FirBand::Bandstop) {
        check(cutoff2, "upper cutoff")?;
        if cutoff2 <= cutoff1 {
            return Err(SfError::invalid(
                "upper cutoff must be greater than lower cutoff",
            ));
        }
    }
    if matches!(band, FirBand::Highpass | FirBand::Bandstop) && order % 2 == 0 {
        return Err(SfError::invalid(
            "highpass and bandstop designs need an odd tap count",
        ));
    }

    let lowpass = |fc: f64| -> Vec<f64> {
        let m = (order - 1) as f64 / 2.0;
        let win = window.coefficients(order);
        let mut h: Vec<f64> = (0..order)
            .map(|i| {
                let t = i as f64 - m;
                let sinc = if t.abs() < 1e-12 {
                    2.0 * fc
                } else {
                    (2.0 * std::f64::consts::PI * fc * t).sin() / (std::f64::consts::PI * t)
                };
                sinc * win[i] as f64
            })
            .collect();
        // unity DC gain
        let sum: f64 = h.iter().sum();
        if sum.abs() > 1e-12 {
            for v in &mut h {
                *v /= sum;
            }
        }
        h
    };

    let h = match band {
        FirBand::Lowpass => lowpass(cutoff1),
        FirBand::Highpass => {
            // spectral inversion of the complementary lowpass
            let mut h = lowpass(cutoff1);
            for v in &mut h {
                *v = -*v;
            }
            h[(order - 1) / 2] += 1.0;
            h
        }
        FirBand::Bandpass => {
            let lo = lowpass(cutoff1);
            let hi = lowpass(cutoff2);
            hi.iter().zip(&lo).map(|(&a, &b)| a - b).collect()
        }
        FirBand::Bandstop => {
            let lo = lowpass(cutoff1);
            let hi = lowpass(cutoff2);
            let mut h: Vec<f64> = lo.iter().zip(&hi).map(|(&a, &b)| a - b).collect();
            h[(order - 1) / 2] += 1.0;
            h
        }
    };

    Ok(h.into_iter().map(|v| v as Sample).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_replays_coefficients() {
        // 21-tap Hamming lowpass, cutoff 0.1; unit impulse in 64 samples
        let mut f = FirFilter::design(FirBand::Lowpass, 21, 0.1, 0.0, WindowKind::Hamming).unwrap();
        let mut input = vec![0.0; 64];
        input[0] = 1.0;
        let mut output = vec![0.0; 64];
        f.process(&input, &mut output, false);
        let coeffs = f.coefficients().to_vec();
        for i in 0..21 {
            assert!((output[i] - coeffs[i]).abs() < 1e-6, "tap {i}");
        }
        for &o in &output[21..] {
            assert!(o.abs() < 1e-6);
        }
    }

    #[test]
    fn stateless_batch_equals_fresh_stateful() {
        let coeffs = vec![0.2, -0.4, 0.6, 0.1];
        let input: Vec<Sample> = (0..40).map(|i| ((i * 13 % 17) as Sample) - 8.0).collect();

        let mut a = FirFilter::new(coeffs.clone()).unwrap();
        // pollute retained state, then run stateless
        for _ in 0..10 {
            a.process_sample(3.0);
        }
        let mut stateless_out = vec![0.0; 40];
        a.process(&input, &mut stateless_out, true);

        let mut b = FirFilter::new(coeffs).unwrap();
        let per_sample: Vec<Sample> = input.iter().map(|&x| b.process_sample(x)).collect();

        assert_eq!(stateless_out, per_sample);
    }

    #[test]
    fn stateless_leaves_state_alone() {
        let mut f = FirFilter::new(vec![1.0, 1.0]).unwrap();
        f.process_sample(5.0);
        let before = f.snapshot_state();
        let mut out = vec![0.0; 4];
        f.process(&[1.0, 2.0, 3.0, 4.0], &mut out, true);
        assert_eq!(f.snapshot_state(), before);
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut f = FirFilter::design(FirBand::Lowpass, 31, 0.125, 0.0, WindowKind::Blackman).unwrap();
        let mut last = 0.0;
        for _ in 0..100 {
            last = f.process_sample(1.0);
        }
        assert!((last - 1.0).abs() < 1e-5);
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = FirFilter::design(FirBand::Highpass, 31, 0.125, 0.0, WindowKind::Hamming).unwrap();
        let mut last = 1.0;
        for _ in 0..100 {
            last = f.process_sample(1.0);
        }
        assert!(last.abs() < 1e-3);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut f = FirFilter::new(vec![0.5, 0.3, 0.2]).unwrap();
        for i in 0..7 {
            f.process_sample(i as Sample);
        }
        let state = f.snapshot_state();
        let mut g = FirFilter::new(vec![0.5, 0.3, 0.2]).unwrap();
        // advance the fresh filter so its write position differs
        for _ in 0..2 {
            g.process_sample(0.0);
        }
        g.restore_state(&state).unwrap();
        for i in 7..20 {
            let x = i as Sample;
            assert_eq!(f.process_sample(x).to_bits(), g.process_sample(x).to_bits());
        }
    }

    #[test]
    fn invalid_designs_rejected() {
        assert!(FirFilter::design(FirBand::Lowpass, 0, 0.1, 0.0, WindowKind::Hann).is_err());
        assert!(FirFilter::design(FirBand::Lowpass, 21, 0.6, 0.0, WindowKind::Hann).is_err());
        assert!(FirFilter::design(FirBand::Highpass, 20, 0.1, 0.0, WindowKind::Hann).is_err());
        assert!(FirFilter::design(FirBand::Bandpass, 21, 0.2, 0.1, WindowKind::Hann).is_err());
    }
}
