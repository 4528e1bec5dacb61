//! One-shot matrix analysis helpers
//!
//! Offline computations that produce parameters for the matrix-transform
//! stages: PCA, whitening, FastICA, CSP and the delay-and-sum / blocking
//! matrices of the GSC preprocessor. Inputs are interleaved f32 buffers;
//! everything internal runs in f64 through nalgebra.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use sf_core::{Sample, SfError, SfResult};

/// Result of a PCA decomposition.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Row-major `num_components x channels` projection matrix
    pub components: Vec<Sample>,
    /// Per-channel mean subtracted before projection
    pub mean: Vec<Sample>,
    /// Eigenvalues, descending
    pub eigenvalues: Vec<f64>,
    pub channels: usize,
    pub num_components: usize,
}

/// Deinterleave into a channels x frames matrix (f64).
fn to_matrix(data: &[Sample], channels: usize) -> SfResult<DMatrix<f64>> {
    if channels == 0 {
        return Err(SfError::invalid("channel count must be non-zero"));
    }
    if data.len() % channels != 0 {
        return Err(SfError::invalid(
            "buffer length is not divisible by the channel count",
        ));
    }
    let frames = data.len() / channels;
    if frames < 2 {
        return Err(SfError::invalid("need at least two frames"));
    }
    Ok(DMatrix::from_fn(channels, frames, |c, i| {
        data[i * channels + c] as f64
    }))
}

/// Per-channel mean and the centered matrix.
fn center(mut m: DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let frames = m.ncols();
    let mean = DVector::from_iterator(
        m.nrows(),
        m.row_iter().map(|r| r.sum() / frames as f64),
    );
    for mut col in m.column_iter_mut() {
        col -= &mean;
    }
    (mean, m)
}

/// Sample covariance of a centered channels x frames matrix.
fn covariance(centered: &DMatrix<f64>) -> DMatrix<f64> {
    let n = centered.ncols() as f64;
    centered * centered.transpose() / (n - 1.0)
}

/// Eigen-decompose a symmetric matrix, eigenvalues descending.
fn sorted_eigen(m: DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let SymmetricEigen {
        eigenvalues,
        eigenvectors,
    } = SymmetricEigen::new(m);
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let vals: Vec<f64> = order.iter().map(|&i| eigenvalues[i]).collect();
    let n = eigenvectors.nrows();
    let vecs = DMatrix::from_fn(n, order.len(), |r, c| eigenvectors[(r, order[c])]);
    (vals, vecs)
}

/// Principal component analysis over interleaved data.
pub fn pca(data: &[Sample], channels: usize, num_components: usize) -> SfResult<PcaResult> {
    if num_components == 0 || num_components > channels {
        return Err(SfError::invalid(format!(
            "component count {num_components} must lie in 1..={channels}"
        )));
    }
    let (mean, centered) = center(to_matrix(data, channels)?);
    let (vals, vecs) = sorted_eigen(covariance(&centered));

    // rows = leading eigenvectors
    let mut components = Vec::with_capacity(num_components * channels);
    for k in 0..num_components {
        for c in 0..channels {
            components.push(vecs[(c, k)] as Sample);
        }
    }
    Ok(PcaResult {
        components,
        mean: mean.iter().map(|&v| v as Sample).collect(),
        eigenvalues: vals,
        channels,
        num_components,
    })
}

/// ZCA-free whitening transform `D^{-1/2} E^T` over the leading components.
pub fn whitening(data: &[Sample], channels: usize, num_components: usize) -> SfResult<PcaResult> {
    let mut result = pca(data, channels, num_components)?;
    for k in 0..result.num_components {
        let ev = result.eigenvalues[k];
        if ev <= 1e-12 {
            return Err(SfError::NumericFailure(format!(
                "covariance is rank-deficient (eigenvalue {ev:.3e} at component {k})"
            )));
        }
        let scale = 1.0 / ev.sqrt();
        for c in 0..channels {
            result.components[k * channels + c] =
                ((result.components[k * channels + c] as f64) * scale) as Sample;
        }
    }
    Ok(result)
}

/// FastICA with tanh contrast and symmetric decorrelation.
///
/// Returns the full unmixing matrix `W` (row-major components x channels,
/// applied after mean removal) and the mean.
pub fn fast_ica(
    data: &[Sample],
    channels: usize,
    num_components: usize,
    max_iter: usize,
    tolerance: f64,
) -> SfResult<PcaResult> {
    let white = whitening(data, channels, num_components)?;
    let (mean_vec, centered) = center(to_matrix(data, channels)?);
    let frames = centered.ncols();

    // whitened observations z = V x_centered
    let v = DMatrix::from_fn(num_components, channels, |r, c| {
        white.components[r * channels + c] as f64
    });
    let z = &v * &centered;

    // deterministic full-rank start
    let mut w = DMatrix::from_fn(num_components, num_components, |r, c| {
        if r == c {
            1.0
        } else {
            0.1 / (1.0 + (r + c) as f64)
        }
    });
    symmetric_decorrelate(&mut w)?;

    let mut converged = false;
    for _ in 0..max_iter.max(1) {
        let prev = w.clone();
        // y = W z ; W+ = E[g(y) z^T] - diag(E[g'(y)]) W
        let y = &w * &z;
        let gy = y.map(|v| v.tanh());
        let gprime_mean = DVector::from_iterator(
            num_components,
            gy.row_iter().map(|row| {
                row.iter().map(|&g| 1.0 - g * g).sum::<f64>() / frames as f64
            }),
        );
        let mut w_new = &gy * z.transpose() / frames as f64;
        for r in 0..num_components {
            for c in 0..num_components {
                w_new[(r, c)] -= gprime_mean[r] * w[(r, c)];
            }
        }
        w = w_new;
        symmetric_decorrelate(&mut w)?;

        // convergence: |diag(W W_prev^T)| -> 1
        let overlap = &w * prev.transpose();
        let worst = (0..num_components)
            .map(|i| (overlap[(i, i)].abs() - 1.0).abs())
            .fold(0.0f64, f64::max);
        if worst < tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(SfError::NumericFailure(
            "FastICA did not converge".to_string(),
        ));
    }

    // total unmixing: W V (components x channels)
    let total = &w * &v;
    Ok(PcaResult {
        components: total.iter_rows_to_vec(),
        mean: mean_vec.iter().map(|&v| v as Sample).collect(),
        eigenvalues: white.eigenvalues,
        channels,
        num_components,
    })
}

/// `W <- (W W^T)^{-1/2} W`
fn symmetric_decorrelate(w: &mut DMatrix<f64>) -> SfResult<()> {
    let gram = &*w * w.transpose();
    let (vals, vecs) = sorted_eigen(gram);
    if vals.iter().any(|&v| v <= 1e-12) {
        return Err(SfError::NumericFailure(
            "degenerate unmixing matrix during decorrelation".to_string(),
        ));
    }
    let n = vals.len();
    let d_inv_sqrt = DMatrix::from_fn(n, n, |r, c| {
        if r == c {
            1.0 / vals[r].sqrt()
        } else {
            0.0
        }
    });
    *w = &vecs * d_inv_sqrt * vecs.transpose() * &*w;
    Ok(())
}

/// Common spatial patterns from two per-class interleaved recordings.
///
/// Returns the full filter matrix (channels x channels, row-major); callers
/// typically keep the first and last rows.
pub fn csp(
    class_a: &[Sample],
    class_b: &[Sample],
    channels: usize,
) -> SfResult<PcaResult> {
    let (_, ca) = center(to_matrix(class_a, channels)?);
    let (_, cb) = center(to_matrix(class_b, channels)?);
    let ra = covariance(&ca);
    let rb = covariance(&cb);

    // whiten the composite covariance
    let (vals, vecs) = sorted_eigen(&ra + &rb);
    if vals.iter().any(|&v| v <= 1e-12) {
        return Err(SfError::NumericFailure(
            "composite covariance is not invertible".to_string(),
        ));
    }
    let n = channels;
    let d_inv_sqrt = DMatrix::from_fn(n, n, |r, c| {
        if r == c {
            1.0 / vals[r].sqrt()
        } else {
            0.0
        }
    });
    let p = d_inv_sqrt * vecs.transpose();

    // eigen-decompose the whitened class-A covariance
    let s = &p * ra * p.transpose();
    let sym = (&s + s.transpose()) * 0.5;
    let (_, e) = sorted_eigen(sym);
    let w = e.transpose() * p;

    Ok(PcaResult {
        components: w.iter_rows_to_vec(),
        mean: vec![0.0; channels],
        eigenvalues: Vec::new(),
        channels,
        num_components: channels,
    })
}

/// Delay-and-sum beamformer weights (uniform) and the difference blocking
/// matrix used by the GSC preprocessor. Row-major `channels x channels`:
/// row 0 is the fixed beamformer, rows 1.. are the blocking rows.
pub fn gsc_matrix(channels: usize) -> SfResult<Vec<Sample>> {
    if channels < 2 {
        return Err(SfError::invalid(
            "GSC preprocessing needs at least two channels",
        ));
    }
    let mut m = vec![0.0 as Sample; channels * channels];
    for c in 0..channels {
        m[c] = 1.0 / channels as Sample;
    }
    for r in 1..channels {
        m[r * channels + (r - 1)] = 1.0;
        m[r * channels + r] = -1.0;
    }
    Ok(m)
}

/// Row-major flattening helper for nalgebra's column-major storage.
trait IterRows {
    fn iter_rows_to_vec(&self) -> Vec<Sample>;
}

impl IterRows for DMatrix<f64> {
    fn iter_rows_to_vec(&self) -> Vec<Sample> {
        let mut out = Vec::with_capacity(self.nrows() * self.ncols());
        for r in 0..self.nrows() {
            for c in 0..self.ncols() {
                out.push(self[(r, c)] as Sample);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Two correlated channels built from independent sources.
    fn mixed_data(frames: usize, seed: u64) -> Vec<Sample> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s1 = ((i as f32) * 0.05).sin();
            let s2 = rng.random::<f32>() * 2.0 - 1.0;
            out.push(0.8 * s1 + 0.2 * s2);
            out.push(0.3 * s1 - 0.7 * s2);
        }
        out
    }

    #[test]
    fn pca_first_component_captures_most_variance() {
        let data = mixed_data(2048, 1);
        let p = pca(&data, 2, 2).unwrap();
        assert_eq!(p.components.len(), 4);
        assert!(p.eigenvalues[0] >= p.eigenvalues[1]);
        assert!(p.eigenvalues[1] >= 0.0);
    }

    #[test]
    fn whitening_unit_variance() {
        let data = mixed_data(4096, 2);
        let w = whitening(&data, 2, 2).unwrap();

        // project and measure component variances
        let frames = data.len() / 2;
        let mut var = [0.0f64; 2];
        for k in 0..2 {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for i in 0..frames {
                let mut y = 0.0f64;
                for c in 0..2 {
                    y += w.components[k * 2 + c] as f64
                        * (data[i * 2 + c] as f64 - w.mean[c] as f64);
                }
                sum += y;
                sum_sq += y * y;
            }
            var[k] = (sum_sq - sum * sum / frames as f64) / (frames as f64 - 1.0);
        }
        assert!((var[0] - 1.0).abs() < 0.05, "var0 {}", var[0]);
        assert!((var[1] - 1.0).abs() < 0.05, "var1 {}", var[1]);
    }

    #[test]
    fn ica_unmixes_independent_sources() {
        // deterministic mixture of a sine and a square-ish source
        let frames = 4096;
        let mut data = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s1 = ((i as f64) * 0.071).sin();
            let s2 = if (i / 64) % 2 == 0 { 0.7 } else { -0.7 };
            data.push((0.6 * s1 + 0.4 * s2) as Sample);
            data.push((0.4 * s1 - 0.5 * s2) as Sample);
        }
        let ica = fast_ica(&data, 2, 2, 400, 1e-5).unwrap();

        // each recovered component should correlate strongly with one source
        for k in 0..2 {
            let mut y: Vec<f64> = Vec::with_capacity(frames);
            for i in 0..frames {
                let mut acc = 0.0f64;
                for c in 0..2 {
                    acc += ica.components[k * 2 + c] as f64
                        * (data[i * 2 + c] as f64 - ica.mean[c] as f64);
                }
                y.push(acc);
            }
            let corr = |sig: &dyn Fn(usize) -> f64| -> f64 {
                let mut num = 0.0;
                let mut dy = 0.0;
                let mut ds = 0.0;
                for (i, &v) in y.iter().enumerate() {
                    let s = sig(i);
                    num += v * s;
                    dy += v * v;
                    ds += s * s;
                }
                (num / (dy.sqrt() * ds.sqrt())).abs()
            };
            let c1 = corr(&|i| ((i as f64) * 0.071).sin());
            let c2 = corr(&|i| if (i / 64) % 2 == 0 { 0.7 } else { -0.7 });
            assert!(
                c1.max(c2) > 0.95,
                "component {k}: correlations {c1:.3} / {c2:.3}"
            );
        }
    }

    #[test]
    fn csp_discriminates_variance_structure() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let frames = 2048;
        let mut a = Vec::with_capacity(frames * 2);
        let mut b = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let n1 = rng.random::<f32>() * 2.0 - 1.0;
            let n2 = rng.random::<f32>() * 2.0 - 1.0;
            // class A: strong first channel; class B: strong second channel
            a.push(2.0 * n1);
            a.push(0.2 * n2);
            b.push(0.2 * n1);
            b.push(2.0 * n2);
        }
        let w = csp(&a, &b, 2).unwrap();
        assert_eq!(w.components.len(), 4);

        // the first CSP filter should favour class A's variance
        let proj_var = |data: &[Sample], row: usize| -> f64 {
            let mut sum_sq = 0.0f64;
            for i in 0..frames {
                let mut y = 0.0f64;
                for c in 0..2 {
                    y += w.components[row * 2 + c] as f64 * data[i * 2 + c] as f64;
                }
                sum_sq += y * y;
            }
            sum_sq / frames as f64
        };
        let ratio_first = proj_var(&a, 0) / proj_var(&b, 0).max(1e-12);
        let ratio_last = proj_var(&a, 1) / proj_var(&b, 1).max(1e-12);
        assert!(ratio_first > 10.0, "first filter ratio {ratio_first}");
        assert!(ratio_last < 0.1, "last filter ratio {ratio_last}");
    }

    #[test]
    fn gsc_rows_sum_to_expected() {
        let m = gsc_matrix(4).unwrap();
        // beamformer row averages, blocking rows cancel common signals
        let beam_sum: f32 = m[..4].iter().sum();
        assert!((beam_sum - 1.0).abs() < 1e-6);
        for r in 1..4 {
            let row_sum: f32 = m[r * 4..(r + 1) * 4].iter().sum();
            assert!(row_sum.abs() < 1e-6);
        }
    }

    #[test]
    fn dimension_errors() {
        assert!(pca(&[1.0, 2.0, 3.0], 2, 1).is_err()); // not divisible
        assert!(pca(&[1.0, 2.0, 3.0, 4.0], 2, 3).is_err()); // too many comps
        assert!(gsc_matrix(1).is_err());
    }
}
