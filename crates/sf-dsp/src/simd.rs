//! Runtime SIMD dispatch for the hot kernels
//!
//! Feature detection happens once and is cached; every public function
//! branches on the detected level and falls back to a scalar path that is
//! always correct and always tested. Reductions return f64: vector paths
//! widen f32 lanes to paired f64 accumulators, the scalar path uses Kahan
//! compensation, so both agree to the last bit for any realistic window.

use std::sync::OnceLock;

use num_complex::Complex;
use sf_core::Sample;

// ═══════════════════════════════════════════════════════════════════════════
// LEVEL DETECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Detected SIMD capability level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SimdLevel {
    /// No SIMD, scalar fallback
    Scalar = 0,
    /// SSE2 (128-bit, baseline on x86_64)
    Sse2 = 1,
    /// AVX2 + FMA (256-bit)
    Avx2 = 2,
    /// ARM NEON (128-bit, baseline on aarch64)
    Neon = 3,
}

impl SimdLevel {
    pub const fn name(self) -> &'static str {
        match self {
            SimdLevel::Scalar => "Scalar",
            SimdLevel::Sse2 => "SSE2",
            SimdLevel::Avx2 => "AVX2",
            SimdLevel::Neon => "NEON",
        }
    }
}

static DETECTED_SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Detect the best available SIMD level (computed once).
pub fn detect_simd_level() -> SimdLevel {
    *DETECTED_SIMD_LEVEL.get_or_init(|| {
        let level = {
            #[cfg(target_arch = "x86_64")]
            {
                if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                    SimdLevel::Avx2
                } else {
                    // SSE2 is part of the x86_64 baseline
                    SimdLevel::Sse2
                }
            }

            #[cfg(target_arch = "aarch64")]
            {
                SimdLevel::Neon
            }

            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            {
                SimdLevel::Scalar
            }
        };
        log::debug!("SIMD dispatch level: {}", level.name());
        level
    })
}

/// Cached SIMD level.
#[inline]
pub fn simd_level() -> SimdLevel {
    detect_simd_level()
}

// ═══════════════════════════════════════════════════════════════════════════
// REDUCTIONS (f64 results)
// ═══════════════════════════════════════════════════════════════════════════

/// Sum of all elements, accumulated in f64.
pub fn sum(x: &[Sample]) -> f64 {
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { sum_avx2(x) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { sum_sse2(x) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { sum_neon(x) },
        _ => sum_scalar(x),
    }
}

/// Sum of squares, accumulated in f64.
pub fn sum_of_squares(x: &[Sample]) -> f64 {
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { sum_sq_avx2(x) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { sum_sq_sse2(x) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { sum_sq_neon(x) },
        _ => sum_sq_scalar(x),
    }
}

/// Dot product over the common prefix of `a` and `b`, accumulated in f64.
pub fn dot_product(a: &[Sample], b: &[Sample]) -> f64 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { dot_avx2(a, b) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { dot_sse2(a, b) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { dot_neon(a, b) },
        _ => dot_scalar(a, b),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ELEMENTWISE MAPS
// ═══════════════════════════════════════════════════════════════════════════

/// `x[i] = |x[i]|`
pub fn abs_inplace(x: &mut [Sample]) {
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { abs_inplace_avx2(x) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { abs_inplace_sse2(x) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { abs_inplace_neon(x) },
        _ => {
            for v in x.iter_mut() {
                *v = v.abs();
            }
        }
    }
}

/// `x[i] = max(0, x[i])` (half-wave rectification)
pub fn max_zero_inplace(x: &mut [Sample]) {
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { max_zero_avx2(x) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { max_zero_sse2(x) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { max_zero_neon(x) },
        _ => {
            for v in x.iter_mut() {
                *v = v.max(0.0);
            }
        }
    }
}

/// `out[i] = input[i] * window[i]` over the common length.
pub fn apply_window(input: &[Sample], window: &[Sample], out: &mut [Sample]) {
    let n = input.len().min(window.len()).min(out.len());
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { apply_window_avx2(&input[..n], &window[..n], &mut out[..n]) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse2 => unsafe { apply_window_sse2(&input[..n], &window[..n], &mut out[..n]) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { apply_window_neon(&input[..n], &window[..n], &mut out[..n]) },
        _ => {
            for i in 0..n {
                out[i] = input[i] * window[i];
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COMPLEX HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// `out[i] = |spec[i]|`
pub fn complex_magnitude(spec: &[Complex<Sample>], out: &mut [Sample]) {
    let n = spec.len().min(out.len());
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { complex_mag_avx2(&spec[..n], &mut out[..n], false) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { complex_mag_neon(&spec[..n], &mut out[..n], false) },
        _ => {
            for i in 0..n {
                out[i] = (spec[i].re * spec[i].re + spec[i].im * spec[i].im).sqrt();
            }
        }
    }
}

/// `out[i] = |spec[i]|^2`
pub fn complex_power(spec: &[Complex<Sample>], out: &mut [Sample]) {
    let n = spec.len().min(out.len());
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { complex_mag_avx2(&spec[..n], &mut out[..n], true) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { complex_mag_neon(&spec[..n], &mut out[..n], true) },
        _ => {
            for i in 0..n {
                out[i] = spec[i].re * spec[i].re + spec[i].im * spec[i].im;
            }
        }
    }
}

/// `out[i] = a[i] * b[i]` (complex multiply)
pub fn complex_multiply(a: &[Complex<Sample>], b: &[Complex<Sample>], out: &mut [Complex<Sample>]) {
    let n = a.len().min(b.len()).min(out.len());
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe { complex_mul_avx2(&a[..n], &b[..n], &mut out[..n]) },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe { complex_mul_neon(&a[..n], &b[..n], &mut out[..n]) },
        _ => {
            for i in 0..n {
                out[i] = a[i] * b[i];
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERLEAVING
// ═══════════════════════════════════════════════════════════════════════════

/// Split interleaved stereo into planar `left`/`right`.
pub fn deinterleave_2ch(input: &[Sample], left: &mut [Sample], right: &mut [Sample]) {
    let frames = (input.len() / 2).min(left.len()).min(right.len());
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe {
            deinterleave_2ch_avx2(&input[..frames * 2], &mut left[..frames], &mut right[..frames])
        },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe {
            deinterleave_2ch_neon(&input[..frames * 2], &mut left[..frames], &mut right[..frames])
        },
        _ => {
            for i in 0..frames {
                left[i] = input[2 * i];
                right[i] = input[2 * i + 1];
            }
        }
    }
}

/// Merge planar `left`/`right` into interleaved stereo.
pub fn interleave_2ch(left: &[Sample], right: &[Sample], out: &mut [Sample]) {
    let frames = left.len().min(right.len()).min(out.len() / 2);
    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => unsafe {
            interleave_2ch_avx2(&left[..frames], &right[..frames], &mut out[..frames * 2])
        },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => unsafe {
            interleave_2ch_neon(&left[..frames], &right[..frames], &mut out[..frames * 2])
        },
        _ => {
            for i in 0..frames {
                out[2 * i] = left[i];
                out[2 * i + 1] = right[i];
            }
        }
    }
}

/// Interleaved → planar (channel-major, contiguous). `out.len()` must be
/// `input.len()`. Strided gathers defeat vector loads; scalar on all paths.
pub fn deinterleave_nch(input: &[Sample], channels: usize, out: &mut [Sample]) {
    if channels == 0 {
        return;
    }
    if channels == 2 && out.len() >= input.len() {
        let frames = input.len() / 2;
        let (l, r) = out.split_at_mut(frames);
        deinterleave_2ch(input, l, r);
        return;
    }
    let frames = input.len() / channels;
    for c in 0..channels {
        for i in 0..frames {
            out[c * frames + i] = input[i * channels + c];
        }
    }
}

/// Planar (channel-major) → interleaved. Inverse of [`deinterleave_nch`].
pub fn interleave_nch(input: &[Sample], channels: usize, out: &mut [Sample]) {
    if channels == 0 {
        return;
    }
    if channels == 2 && out.len() >= input.len() {
        let frames = input.len() / 2;
        let (l, r) = input.split_at(frames);
        interleave_2ch(l, r, out);
        return;
    }
    let frames = input.len() / channels;
    for c in 0..channels {
        for i in 0..frames {
            out[i * channels + c] = input[c * frames + i];
        }
    }
}

/// Extract one channel from an interleaved buffer.
pub fn extract_channel(input: &[Sample], channels: usize, channel: usize, out: &mut [Sample]) {
    let frames = (input.len() / channels.max(1)).min(out.len());
    for (i, o) in out.iter_mut().take(frames).enumerate() {
        *o = input[i * channels + channel];
    }
}

/// Scatter one channel back into an interleaved buffer.
pub fn scatter_channel(values: &[Sample], channels: usize, channel: usize, out: &mut [Sample]) {
    let frames = (out.len() / channels.max(1)).min(values.len());
    for (i, &v) in values.iter().take(frames).enumerate() {
        out[i * channels + channel] = v;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TIMESTAMP REINTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════

/// Resample a timestamp track after a resizing stage.
///
/// Output slot `i` is filled by treating `i * scale` as a fractional index
/// into the previous per-sample timestamps (stride `src_channels`) and
/// linearly interpolating; the value is replicated across all `dst_channels`
/// of the output sample.
pub fn reinterp_timestamps(
    src: &[Sample],
    src_channels: usize,
    dst: &mut [Sample],
    dst_channels: usize,
    scale: f64,
) {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let src_samples = src.len() / src_channels;
    let dst_samples = dst.len() / dst_channels;
    if src_samples == 0 {
        return;
    }
    for i in 0..dst_samples {
        let pos = i as f64 * scale;
        let j = (pos.floor() as usize).min(src_samples - 1);
        let k = (j + 1).min(src_samples - 1);
        let frac = (pos - j as f64).clamp(0.0, 1.0);
        let t0 = src[j * src_channels] as f64;
        let t1 = src[k * src_channels] as f64;
        let t = (t0 + (t1 - t0) * frac) as Sample;
        for c in 0..dst_channels {
            dst[i * dst_channels + c] = t;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCALAR KERNELS (Kahan-compensated reductions)
// ═══════════════════════════════════════════════════════════════════════════

fn sum_scalar(x: &[Sample]) -> f64 {
    let mut s = 0.0f64;
    let mut c = 0.0f64;
    for &v in x {
        let y = v as f64 - c;
        let t = s + y;
        c = (t - s) - y;
        s = t;
    }
    s
}

fn sum_sq_scalar(x: &[Sample]) -> f64 {
    let mut s = 0.0f64;
    let mut c = 0.0f64;
    for &v in x {
        let y = (v as f64) * (v as f64) - c;
        let t = s + y;
        c = (t - s) - y;
        s = t;
    }
    s
}

fn dot_scalar(a: &[Sample], b: &[Sample]) -> f64 {
    let mut s = 0.0f64;
    let mut c = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let p = (x as f64) * (y as f64) - c;
        let t = s + p;
        c = (t - s) - p;
        s = t;
    }
    s
}

// ═══════════════════════════════════════════════════════════════════════════
// x86_64 KERNELS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::Sample;
    use num_complex::Complex;
    use std::arch::x86_64::*;

    #[inline]
    unsafe fn hsum_pd256(v: __m256d) -> f64 {
        let hi = _mm256_extractf128_pd(v, 1);
        let lo = _mm256_castpd256_pd128(v);
        let s = _mm_add_pd(lo, hi);
        let h = _mm_unpackhi_pd(s, s);
        _mm_cvtsd_f64(_mm_add_pd(s, h))
    }

    #[inline]
    unsafe fn hsum_pd128(v: __m128d) -> f64 {
        let h = _mm_unpackhi_pd(v, v);
        _mm_cvtsd_f64(_mm_add_pd(v, h))
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn sum_avx2(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(8);
        let rem = chunks.remainder();
        let mut acc0 = _mm256_setzero_pd();
        let mut acc1 = _mm256_setzero_pd();
        for chunk in chunks {
            let v = _mm256_loadu_ps(chunk.as_ptr());
            acc0 = _mm256_add_pd(acc0, _mm256_cvtps_pd(_mm256_castps256_ps128(v)));
            acc1 = _mm256_add_pd(acc1, _mm256_cvtps_pd(_mm256_extractf128_ps(v, 1)));
        }
        let mut total = hsum_pd256(_mm256_add_pd(acc0, acc1));
        for &v in rem {
            total += v as f64;
        }
        total
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn sum_sq_avx2(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(8);
        let rem = chunks.remainder();
        let mut acc0 = _mm256_setzero_pd();
        let mut acc1 = _mm256_setzero_pd();
        for chunk in chunks {
            let v = _mm256_loadu_ps(chunk.as_ptr());
            let lo = _mm256_cvtps_pd(_mm256_castps256_ps128(v));
            let hi = _mm256_cvtps_pd(_mm256_extractf128_ps(v, 1));
            acc0 = _mm256_fmadd_pd(lo, lo, acc0);
            acc1 = _mm256_fmadd_pd(hi, hi, acc1);
        }
        let mut total = hsum_pd256(_mm256_add_pd(acc0, acc1));
        for &v in rem {
            total += (v as f64) * (v as f64);
        }
        total
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn dot_avx2(a: &[Sample], b: &[Sample]) -> f64 {
        let chunks_a = a.chunks_exact(8);
        let rem_a = chunks_a.remainder();
        let rem_b = &b[a.len() - rem_a.len()..];
        let mut acc0 = _mm256_setzero_pd();
        let mut acc1 = _mm256_setzero_pd();
        for (i, chunk) in chunks_a.enumerate() {
            let va = _mm256_loadu_ps(chunk.as_ptr());
            let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
            let la = _mm256_cvtps_pd(_mm256_castps256_ps128(va));
            let ha = _mm256_cvtps_pd(_mm256_extractf128_ps(va, 1));
            let lb = _mm256_cvtps_pd(_mm256_castps256_ps128(vb));
            let hb = _mm256_cvtps_pd(_mm256_extractf128_ps(vb, 1));
            acc0 = _mm256_fmadd_pd(la, lb, acc0);
            acc1 = _mm256_fmadd_pd(ha, hb, acc1);
        }
        let mut total = hsum_pd256(_mm256_add_pd(acc0, acc1));
        for (&x, &y) in rem_a.iter().zip(rem_b) {
            total += (x as f64) * (y as f64);
        }
        total
    }

    pub unsafe fn sum_sse2(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(4);
        let rem = chunks.remainder();
        let mut acc0 = _mm_setzero_pd();
        let mut acc1 = _mm_setzero_pd();
        for chunk in chunks {
            let v = _mm_loadu_ps(chunk.as_ptr());
            acc0 = _mm_add_pd(acc0, _mm_cvtps_pd(v));
            acc1 = _mm_add_pd(acc1, _mm_cvtps_pd(_mm_movehl_ps(v, v)));
        }
        let mut total = hsum_pd128(_mm_add_pd(acc0, acc1));
        for &v in rem {
            total += v as f64;
        }
        total
    }

    pub unsafe fn sum_sq_sse2(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(4);
        let rem = chunks.remainder();
        let mut acc0 = _mm_setzero_pd();
        let mut acc1 = _mm_setzero_pd();
        for chunk in chunks {
            let v = _mm_loadu_ps(chunk.as_ptr());
            let lo = _mm_cvtps_pd(v);
            let hi = _mm_cvtps_pd(_mm_movehl_ps(v, v));
            acc0 = _mm_add_pd(acc0, _mm_mul_pd(lo, lo));
            acc1 = _mm_add_pd(acc1, _mm_mul_pd(hi, hi));
        }
        let mut total = hsum_pd128(_mm_add_pd(acc0, acc1));
        for &v in rem {
            total += (v as f64) * (v as f64);
        }
        total
    }

    pub unsafe fn dot_sse2(a: &[Sample], b: &[Sample]) -> f64 {
        let chunks_a = a.chunks_exact(4);
        let rem_a = chunks_a.remainder();
        let rem_b = &b[a.len() - rem_a.len()..];
        let mut acc0 = _mm_setzero_pd();
        let mut acc1 = _mm_setzero_pd();
        for (i, chunk) in chunks_a.enumerate() {
            let va = _mm_loadu_ps(chunk.as_ptr());
            let vb = _mm_loadu_ps(b.as_ptr().add(i * 4));
            let la = _mm_cvtps_pd(va);
            let ha = _mm_cvtps_pd(_mm_movehl_ps(va, va));
            let lb = _mm_cvtps_pd(vb);
            let hb = _mm_cvtps_pd(_mm_movehl_ps(vb, vb));
            acc0 = _mm_add_pd(acc0, _mm_mul_pd(la, lb));
            acc1 = _mm_add_pd(acc1, _mm_mul_pd(ha, hb));
        }
        let mut total = hsum_pd128(_mm_add_pd(acc0, acc1));
        for (&x, &y) in rem_a.iter().zip(rem_b) {
            total += (x as f64) * (y as f64);
        }
        total
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn abs_inplace_avx2(x: &mut [Sample]) {
        let mask = _mm256_castsi256_ps(_mm256_set1_epi32(0x7fff_ffff));
        let mut i = 0;
        while i + 8 <= x.len() {
            let v = _mm256_loadu_ps(x.as_ptr().add(i));
            _mm256_storeu_ps(x.as_mut_ptr().add(i), _mm256_and_ps(v, mask));
            i += 8;
        }
        for v in &mut x[i..] {
            *v = v.abs();
        }
    }

    pub unsafe fn abs_inplace_sse2(x: &mut [Sample]) {
        let mask = _mm_castsi128_ps(_mm_set1_epi32(0x7fff_ffff));
        let mut i = 0;
        while i + 4 <= x.len() {
            let v = _mm_loadu_ps(x.as_ptr().add(i));
            _mm_storeu_ps(x.as_mut_ptr().add(i), _mm_and_ps(v, mask));
            i += 4;
        }
        for v in &mut x[i..] {
            *v = v.abs();
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn max_zero_avx2(x: &mut [Sample]) {
        let zero = _mm256_setzero_ps();
        let mut i = 0;
        while i + 8 <= x.len() {
            let v = _mm256_loadu_ps(x.as_ptr().add(i));
            _mm256_storeu_ps(x.as_mut_ptr().add(i), _mm256_max_ps(v, zero));
            i += 8;
        }
        for v in &mut x[i..] {
            *v = v.max(0.0);
        }
    }

    pub unsafe fn max_zero_sse2(x: &mut [Sample]) {
        let zero = _mm_setzero_ps();
        let mut i = 0;
        while i + 4 <= x.len() {
            let v = _mm_loadu_ps(x.as_ptr().add(i));
            _mm_storeu_ps(x.as_mut_ptr().add(i), _mm_max_ps(v, zero));
            i += 4;
        }
        for v in &mut x[i..] {
            *v = v.max(0.0);
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn apply_window_avx2(input: &[Sample], window: &[Sample], out: &mut [Sample]) {
        let n = input.len();
        let mut i = 0;
        while i + 8 <= n {
            let v = _mm256_loadu_ps(input.as_ptr().add(i));
            let w = _mm256_loadu_ps(window.as_ptr().add(i));
            _mm256_storeu_ps(out.as_mut_ptr().add(i), _mm256_mul_ps(v, w));
            i += 8;
        }
        for j in i..n {
            out[j] = input[j] * window[j];
        }
    }

    pub unsafe fn apply_window_sse2(input: &[Sample], window: &[Sample], out: &mut [Sample]) {
        let n = input.len();
        let mut i = 0;
        while i + 4 <= n {
            let v = _mm_loadu_ps(input.as_ptr().add(i));
            let w = _mm_loadu_ps(window.as_ptr().add(i));
            _mm_storeu_ps(out.as_mut_ptr().add(i), _mm_mul_ps(v, w));
            i += 4;
        }
        for j in i..n {
            out[j] = input[j] * window[j];
        }
    }

    /// Magnitude (or power when `power` is set) of 8 complex values per
    /// iteration via the hadd + lane-fix pattern.
    #[target_feature(enable = "avx2")]
    pub unsafe fn complex_mag_avx2(spec: &[Complex<Sample>], out: &mut [Sample], power: bool) {
        let n = spec.len();
        let p = spec.as_ptr() as *const Sample;
        let idx = _mm256_setr_epi32(0, 1, 4, 5, 2, 3, 6, 7);
        let mut i = 0;
        while i + 8 <= n {
            let v1 = _mm256_loadu_ps(p.add(i * 2));
            let v2 = _mm256_loadu_ps(p.add(i * 2 + 8));
            let sq1 = _mm256_mul_ps(v1, v1);
            let sq2 = _mm256_mul_ps(v2, v2);
            let pairs = _mm256_hadd_ps(sq1, sq2);
            let mut res = _mm256_permutevar8x32_ps(pairs, idx);
            if !power {
                res = _mm256_sqrt_ps(res);
            }
            _mm256_storeu_ps(out.as_mut_ptr().add(i), res);
            i += 8;
        }
        for j in i..n {
            let m = spec[j].re * spec[j].re + spec[j].im * spec[j].im;
            out[j] = if power { m } else { m.sqrt() };
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub unsafe fn complex_mul_avx2(
        a: &[Complex<Sample>],
        b: &[Complex<Sample>],
        out: &mut [Complex<Sample>],
    ) {
        let n = a.len();
        let pa = a.as_ptr() as *const Sample;
        let pb = b.as_ptr() as *const Sample;
        let po = out.as_mut_ptr() as *mut Sample;
        let mut i = 0;
        while i + 4 <= n {
            let va = _mm256_loadu_ps(pa.add(i * 2));
            let vb = _mm256_loadu_ps(pb.add(i * 2));
            let ar = _mm256_moveldup_ps(va);
            let ai = _mm256_movehdup_ps(va);
            let bswap = _mm256_permute_ps(vb, 0xB1);
            let t = _mm256_mul_ps(ai, bswap);
            let res = _mm256_fmaddsub_ps(ar, vb, t);
            _mm256_storeu_ps(po.add(i * 2), res);
            i += 4;
        }
        for j in i..n {
            out[j] = a[j] * b[j];
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn deinterleave_2ch_avx2(input: &[Sample], left: &mut [Sample], right: &mut [Sample]) {
        let frames = left.len();
        let p = input.as_ptr();
        let mut i = 0;
        while i + 8 <= frames {
            let v1 = _mm256_loadu_ps(p.add(i * 2));
            let v2 = _mm256_loadu_ps(p.add(i * 2 + 8));
            let l = _mm256_castpd_ps(_mm256_permute4x64_pd(
                _mm256_castps_pd(_mm256_shuffle_ps(v1, v2, 0b10_00_10_00)),
                0b11_01_10_00,
            ));
            let r = _mm256_castpd_ps(_mm256_permute4x64_pd(
                _mm256_castps_pd(_mm256_shuffle_ps(v1, v2, 0b11_01_11_01)),
                0b11_01_10_00,
            ));
            _mm256_storeu_ps(left.as_mut_ptr().add(i), l);
            _mm256_storeu_ps(right.as_mut_ptr().add(i), r);
            i += 8;
        }
        for j in i..frames {
            left[j] = input[2 * j];
            right[j] = input[2 * j + 1];
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn interleave_2ch_avx2(left: &[Sample], right: &[Sample], out: &mut [Sample]) {
        let frames = left.len();
        let po = out.as_mut_ptr();
        let mut i = 0;
        while i + 8 <= frames {
            let l = _mm256_loadu_ps(left.as_ptr().add(i));
            let r = _mm256_loadu_ps(right.as_ptr().add(i));
            let lo = _mm256_unpacklo_ps(l, r);
            let hi = _mm256_unpackhi_ps(l, r);
            _mm256_storeu_ps(po.add(i * 2), _mm256_permute2f128_ps(lo, hi, 0x20));
            _mm256_storeu_ps(po.add(i * 2 + 8), _mm256_permute2f128_ps(lo, hi, 0x31));
            i += 8;
        }
        for j in i..frames {
            out[2 * j] = left[j];
            out[2 * j + 1] = right[j];
        }
    }
}

#[cfg(target_arch = "x86_64")]
use x86::*;

// ═══════════════════════════════════════════════════════════════════════════
// aarch64 KERNELS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(target_arch = "aarch64")]
mod arm {
    use super::Sample;
    use num_complex::Complex;
    use std::arch::aarch64::*;

    pub unsafe fn sum_neon(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(4);
        let rem = chunks.remainder();
        let mut acc0 = vdupq_n_f64(0.0);
        let mut acc1 = vdupq_n_f64(0.0);
        for chunk in chunks {
            let v = vld1q_f32(chunk.as_ptr());
            acc0 = vaddq_f64(acc0, vcvt_f64_f32(vget_low_f32(v)));
            acc1 = vaddq_f64(acc1, vcvt_high_f64_f32(v));
        }
        let mut total = vaddvq_f64(vaddq_f64(acc0, acc1));
        for &v in rem {
            total += v as f64;
        }
        total
    }

    pub unsafe fn sum_sq_neon(x: &[Sample]) -> f64 {
        let chunks = x.chunks_exact(4);
        let rem = chunks.remainder();
        let mut acc0 = vdupq_n_f64(0.0);
        let mut acc1 = vdupq_n_f64(0.0);
        for chunk in chunks {
            let v = vld1q_f32(chunk.as_ptr());
            let lo = vcvt_f64_f32(vget_low_f32(v));
            let hi = vcvt_high_f64_f32(v);
            acc0 = vfmaq_f64(acc0, lo, lo);
            acc1 = vfmaq_f64(acc1, hi, hi);
        }
        let mut total = vaddvq_f64(vaddq_f64(acc0, acc1));
        for &v in rem {
            total += (v as f64) * (v as f64);
        }
        total
    }

    pub unsafe fn dot_neon(a: &[Sample], b: &[Sample]) -> f64 {
        let chunks = a.chunks_exact(4);
        let rem_a = chunks.remainder();
        let rem_b = &b[a.len() - rem_a.len()..];
        let mut acc0 = vdupq_n_f64(0.0);
        let mut acc1 = vdupq_n_f64(0.0);
        for (i, chunk) in chunks.enumerate() {
            let va = vld1q_f32(chunk.as_ptr());
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            acc0 = vfmaq_f64(acc0, vcvt_f64_f32(vget_low_f32(va)), vcvt_f64_f32(vget_low_f32(vb)));
            acc1 = vfmaq_f64(acc1, vcvt_high_f64_f32(va), vcvt_high_f64_f32(vb));
        }
        let mut total = vaddvq_f64(vaddq_f64(acc0, acc1));
        for (&x, &y) in rem_a.iter().zip(rem_b) {
            total += (x as f64) * (y as f64);
        }
        total
    }

    pub unsafe fn abs_inplace_neon(x: &mut [Sample]) {
        let mut i = 0;
        while i + 4 <= x.len() {
            let v = vld1q_f32(x.as_ptr().add(i));
            vst1q_f32(x.as_mut_ptr().add(i), vabsq_f32(v));
            i += 4;
        }
        for v in &mut x[i..] {
            *v = v.abs();
        }
    }

    pub unsafe fn max_zero_neon(x: &mut [Sample]) {
        let zero = vdupq_n_f32(0.0);
        let mut i = 0;
        while i + 4 <= x.len() {
            let v = vld1q_f32(x.as_ptr().add(i));
            vst1q_f32(x.as_mut_ptr().add(i), vmaxq_f32(v, zero));
            i += 4;
        }
        for v in &mut x[i..] {
            *v = v.max(0.0);
        }
    }

    pub unsafe fn apply_window_neon(input: &[Sample], window: &[Sample], out: &mut [Sample]) {
        let n = input.len();
        let mut i = 0;
        while i + 4 <= n {
            let v = vld1q_f32(input.as_ptr().add(i));
            let w = vld1q_f32(window.as_ptr().add(i));
            vst1q_f32(out.as_mut_ptr().add(i), vmulq_f32(v, w));
            i += 4;
        }
        for j in i..n {
            out[j] = input[j] * window[j];
        }
    }

    pub unsafe fn complex_mag_neon(spec: &[Complex<Sample>], out: &mut [Sample], power: bool) {
        let n = spec.len();
        let p = spec.as_ptr() as *const Sample;
        let mut i = 0;
        while i + 4 <= n {
            let ri = vld2q_f32(p.add(i * 2));
            let mut m = vfmaq_f32(vmulq_f32(ri.0, ri.0), ri.1, ri.1);
            if !power {
                m = vsqrtq_f32(m);
            }
            vst1q_f32(out.as_mut_ptr().add(i), m);
            i += 4;
        }
        for j in i..n {
            let m = spec[j].re * spec[j].re + spec[j].im * spec[j].im;
            out[j] = if power { m } else { m.sqrt() };
        }
    }

    pub unsafe fn complex_mul_neon(
        a: &[Complex<Sample>],
        b: &[Complex<Sample>],
        out: &mut [Complex<Sample>],
    ) {
        let n = a.len();
        let pa = a.as_ptr() as *const Sample;
        let pb = b.as_ptr() as *const Sample;
        let po = out.as_mut_ptr() as *mut Sample;
        let mut i = 0;
        while i + 4 <= n {
            let va = vld2q_f32(pa.add(i * 2));
            let vb = vld2q_f32(pb.add(i * 2));
            let re = vfmsq_f32(vmulq_f32(va.0, vb.0), va.1, vb.1);
            let im = vfmaq_f32(vmulq_f32(va.0, vb.1), va.1, vb.0);
            vst2q_f32(po.add(i * 2), float32x4x2_t(re, im));
            i += 4;
        }
        for j in i..n {
            out[j] = a[j] * b[j];
        }
    }

    pub unsafe fn deinterleave_2ch_neon(input: &[Sample], left: &mut [Sample], right: &mut [Sample]) {
        let frames = left.len();
        let mut i = 0;
        while i + 4 <= frames {
            let lr = vld2q_f32(input.as_ptr().add(i * 2));
            vst1q_f32(left.as_mut_ptr().add(i), lr.0);
            vst1q_f32(right.as_mut_ptr().add(i), lr.1);
            i += 4;
        }
        for j in i..frames {
            left[j] = input[2 * j];
            right[j] = input[2 * j + 1];
        }
    }

    pub unsafe fn interleave_2ch_neon(left: &[Sample], right: &[Sample], out: &mut [Sample]) {
        let frames = left.len();
        let mut i = 0;
        while i + 4 <= frames {
            let l = vld1q_f32(left.as_ptr().add(i));
            let r = vld1q_f32(right.as_ptr().add(i));
            vst2q_f32(out.as_mut_ptr().add(i * 2), float32x4x2_t(l, r));
            i += 4;
        }
        for j in i..frames {
            out[2 * j] = left[j];
            out[2 * j + 1] = right[j];
        }
    }
}

#[cfg(target_arch = "aarch64")]
use arm::*;

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
