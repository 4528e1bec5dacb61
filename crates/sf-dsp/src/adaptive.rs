//! Adaptive filter cores: LMS/NLMS, RLS and a scalar Kalman estimator

use nalgebra::{DMatrix, DVector};
use sf_core::{Sample, SfError, SfResult};

/// Adaptive FIR with LMS or NLMS weight updates.
///
/// `process` computes `y = w . x`, `e = d - y`, and when adapting updates
/// `w += mu * e * x / (lambda + ||x||^2)` in normalized mode or
/// `w += mu * e * x` in plain LMS mode.
#[derive(Debug, Clone)]
pub struct AdaptiveFir {
    weights: Vec<f64>,
    delay: Vec<f64>,
    mu: f64,
    normalized: bool,
    lambda: f64,
}

impl AdaptiveFir {
    pub fn new(num_taps: usize, mu: f64, normalized: bool, lambda: f64) -> SfResult<Self> {
        if num_taps == 0 {
            return Err(SfError::invalid("adaptive filter needs at least one tap"));
        }
        if mu <= 0.0 {
            return Err(SfError::invalid("learning rate must be positive"));
        }
        if normalized && lambda < 0.0 {
            return Err(SfError::invalid("regularization must be non-negative"));
        }
        Ok(Self {
            weights: vec![0.0; num_taps],
            delay: vec![0.0; num_taps],
            mu,
            normalized,
            lambda,
        })
    }

    pub fn num_taps(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// One sample: shift `input` into the regressor, produce (output, error)
    /// against `desired`, adapt when requested.
    pub fn process_sample(&mut self, input: Sample, desired: Sample, adapt: bool) -> (Sample, Sample) {
        for i in (1..self.delay.len()).rev() {
            self.delay[i] = self.delay[i - 1];
        }
        self.delay[0] = input as f64;

        let y: f64 = self
            .weights
            .iter()
            .zip(&self.delay)
            .map(|(&w, &x)| w * x)
            .sum();
        let e = desired as f64 - y;

        if adapt {
            let step = if self.normalized {
                let energy: f64 = self.delay.iter().map(|&x| x * x).sum();
                self.mu / (self.lambda + energy)
            } else {
                self.mu
            };
            for (w, &x) in self.weights.iter_mut().zip(&self.delay) {
                *w += step * e * x;
            }
        }
        (y as Sample, e as Sample)
    }

    /// Batch driver over parallel input/desired tracks.
    pub fn process(
        &mut self,
        input: &[Sample],
        desired: &[Sample],
        output: &mut [Sample],
        error: &mut [Sample],
        adapt: bool,
    ) {
        let n = input
            .len()
            .min(desired.len())
            .min(output.len())
            .min(error.len());
        for i in 0..n {
            let (y, e) = self.process_sample(input[i], desired[i], adapt);
            output[i] = y;
            error[i] = e;
        }
    }

    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.delay.fill(0.0);
    }

    pub fn snapshot_state(&self) -> (Vec<Sample>, Vec<Sample>) {
        (
            self.weights.iter().map(|&w| w as Sample).collect(),
            self.delay.iter().map(|&x| x as Sample).collect(),
        )
    }

    pub fn restore_state(&mut self, weights: &[Sample], delay: &[Sample]) -> SfResult<()> {
        if weights.len() != self.weights.len() || delay.len() != self.delay.len() {
            return Err(SfError::CorruptSnapshot(
                "adaptive filter state length mismatch".to_string(),
            ));
        }
        for (w, &s) in self.weights.iter_mut().zip(weights) {
            *w = s as f64;
        }
        for (d, &s) in self.delay.iter_mut().zip(delay) {
            *d = s as f64;
        }
        Ok(())
    }
}

/// Recursive least squares with exponential forgetting.
#[derive(Debug, Clone)]
pub struct RlsCore {
    weights: DVector<f64>,
    p: DMatrix<f64>,
    delay: Vec<f64>,
    lambda: f64,
    delta: f64,
}

impl RlsCore {
    pub fn new(num_taps: usize, lambda: f64, delta: f64) -> SfResult<Self> {
        if num_taps == 0 {
            return Err(SfError::invalid("RLS filter needs at least one tap"));
        }
        if !(0.0..=1.0).contains(&lambda) || lambda == 0.0 {
            return Err(SfError::invalid("forgetting factor must lie in (0, 1]"));
        }
        if delta <= 0.0 {
            return Err(SfError::invalid("RLS delta must be positive"));
        }
        Ok(Self {
            weights: DVector::zeros(num_taps),
            p: DMatrix::identity(num_taps, num_taps) / delta,
            delay: vec![0.0; num_taps],
            lambda,
            delta,
        })
    }

    pub fn num_taps(&self) -> usize {
        self.delay.len()
    }

    /// One sample; returns (output, error).
    pub fn process_sample(&mut self, input: Sample, desired: Sample) -> (Sample, Sample) {
        for i in (1..self.delay.len()).rev() {
            self.delay[i] = self.delay[i - 1];
        }
        self.delay[0] = input as f64;
        let x = DVector::from_column_slice(&self.delay);

        let y = self.weights.dot(&x);
        let e = desired as f64 - y;

        let px = &self.p * &x;
        let denom = self.lambda + x.dot(&px);
        let k = px / denom;
        self.weights += &k * e;
        let kt_p = k * (x.transpose() * &self.p);
        self.p = (&self.p - kt_p) / self.lambda;

        (y as Sample, e as Sample)
    }

    pub fn reset(&mut self) {
        let n = self.delay.len();
        self.weights = DVector::zeros(n);
        self.p = DMatrix::identity(n, n) / self.delta;
        self.delay.fill(0.0);
    }

    /// (weights, delay, flattened inverse-correlation matrix).
    pub fn snapshot_state(&self) -> (Vec<Sample>, Vec<Sample>, Vec<Sample>) {
        (
            self.weights.iter().map(|&w| w as Sample).collect(),
            self.delay.iter().map(|&x| x as Sample).collect(),
            self.p.iter().map(|&v| v as Sample).collect(),
        )
    }

    pub fn restore_state(
        &mut self,
        weights: &[Sample],
        delay: &[Sample],
        p: &[Sample],
    ) -> SfResult<()> {
        let n = self.delay.len();
        if weights.len() != n || delay.len() != n || p.len() != n * n {
            return Err(SfError::CorruptSnapshot(
                "RLS state length mismatch".to_string(),
            ));
        }
        self.weights = DVector::from_iterator(n, weights.iter().map(|&v| v as f64));
        for (d, &s) in self.delay.iter_mut().zip(delay) {
            *d = s as f64;
        }
        self.p = DMatrix::from_iterator(n, n, p.iter().map(|&v| v as f64));
        Ok(())
    }
}

/// One-dimensional constant-state Kalman estimator.
#[derive(Debug, Clone)]
pub struct ScalarKalman {
    q: f64,
    r: f64,
    x: f64,
    p: f64,
    primed: bool,
}

impl ScalarKalman {
    pub fn new(process_noise: f64, measurement_noise: f64) -> SfResult<Self> {
        if process_noise < 0.0 || measurement_noise <= 0.0 {
            return Err(SfError::invalid(
                "kalman noise terms must be positive (process noise may be zero)",
            ));
        }
        Ok(Self {
            q: process_noise,
            r: measurement_noise,
            x: 0.0,
            p: 1.0,
            primed: false,
        })
    }

    /// Filtered estimate for measurement `z`.
    pub fn process_sample(&mut self, z: Sample) -> Sample {
        if !self.primed {
            self.x = z as f64;
            self.primed = true;
            return z;
        }
        self.p += self.q;
        let k = self.p / (self.p + self.r);
        self.x += k * (z as f64 - self.x);
        self.p *= 1.0 - k;
        self.x as Sample
    }

    pub fn reset(&mut self) {
        self.x = 0.0;
        self.p = 1.0;
        self.primed = false;
    }

    /// (estimate, covariance, primed flag encoded as 0/1).
    pub fn snapshot_state(&self) -> Vec<f64> {
        vec![self.x, self.p, self.primed as u8 as f64]
    }

    pub fn restore_state(&mut self, state: &[f64]) -> SfResult<()> {
        if state.len() < 3 {
            return Err(SfError::CorruptSnapshot(
                "kalman state length mismatch".to_string(),
            ));
        }
        self.x = state[0];
        self.p = state[1];
        self.primed = state[2] != 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identification: adapt against a known FIR and recover its taps.
    fn identify(mut adaptive: AdaptiveFir, taps: &[f64], iters: usize) -> Vec<f64> {
        let mut delay = vec![0.0f64; taps.len()];
        let mut seed = 0x12345678u64;
        for _ in 0..iters {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let x = ((seed >> 33) as f64 / (1u64 << 31) as f64) - 1.0;
            for i in (1..delay.len()).rev() {
                delay[i] = delay[i - 1];
            }
            delay[0] = x;
            let d: f64 = taps.iter().zip(&delay).map(|(&t, &v)| t * v).sum();
            adaptive.process_sample(x as Sample, d as Sample, true);
        }
        adaptive.weights().to_vec()
    }

    #[test]
    fn nlms_identifies_unknown_system() {
        let target = [0.5, -0.25, 0.125];
        let adaptive = AdaptiveFir::new(3, 0.5, true, 1e-6).unwrap();
        let w = identify(adaptive, &target, 5000);
        for (got, want) in w.iter().zip(&target) {
            assert!((got - want).abs() < 1e-2, "got {got}, want {want}");
        }
    }

    #[test]
    fn lms_converges_on_stationary_input() {
        let target = [0.8, 0.1];
        let adaptive = AdaptiveFir::new(2, 0.05, false, 0.0).unwrap();
        let w = identify(adaptive, &target, 20000);
        for (got, want) in w.iter().zip(&target) {
            assert!((got - want).abs() < 5e-2);
        }
    }

    #[test]
    fn frozen_weights_do_not_adapt() {
        let mut f = AdaptiveFir::new(4, 0.1, true, 1e-3).unwrap();
        f.process_sample(1.0, 1.0, true);
        let w = f.weights().to_vec();
        f.process_sample(0.5, -2.0, false);
        assert_eq!(f.weights(), &w[..]);
    }

    #[test]
    fn rls_identifies_faster_than_lms() {
        let target = [0.5, -0.25];
        let mut rls = RlsCore::new(2, 0.99, 0.01).unwrap();
        let mut delay = vec![0.0f64; 2];
        let mut seed = 7u64;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let x = ((seed >> 33) as f64 / (1u64 << 31) as f64) - 1.0;
            for i in (1..delay.len()).rev() {
                delay[i] = delay[i - 1];
            }
            delay[0] = x;
            let d: f64 = target.iter().zip(&delay).map(|(&t, &v)| t * v).sum();
            rls.process_sample(x as Sample, d as Sample);
        }
        let (w, _, _) = rls.snapshot_state();
        assert!((w[0] as f64 - 0.5).abs() < 1e-2);
        assert!((w[1] as f64 + 0.25).abs() < 1e-2);
    }

    #[test]
    fn kalman_smooths_toward_constant() {
        let mut k = ScalarKalman::new(1e-5, 0.1).unwrap();
        let mut last = 0.0;
        for i in 0..2000 {
            let noise = if i % 2 == 0 { 0.05 } else { -0.05 };
            last = k.process_sample(1.0 + noise);
        }
        assert!((last - 1.0).abs() < 0.02);
    }

    #[test]
    fn parameter_validation() {
        assert!(AdaptiveFir::new(0, 0.1, false, 0.0).is_err());
        assert!(AdaptiveFir::new(4, -0.1, false, 0.0).is_err());
        assert!(RlsCore::new(4, 0.0, 0.01).is_err());
        assert!(RlsCore::new(4, 0.99, 0.0).is_err());
        assert!(ScalarKalman::new(-1.0, 0.1).is_err());
    }
}
