//! Sliding-window filter engine with incremental policies
//!
//! A generic engine that drives a [`WindowPolicy`] as samples move through a
//! fixed-size (or time-bounded) window. Policies carry only the scalar
//! running statistics they need; the window contents live in the shared ring
//! buffer, so a policy can always be rebuilt from the window by replay.

use crate::simd;
use sf_core::{RingBuffer, Sample, SfError, SfResult, TimestampMs};

/// Incremental statistic over a sliding window.
///
/// `on_add`/`on_remove` maintain running scalars as the window slides;
/// `result` produces the statistic for the current window. `state`/`restore`
/// expose the scalars for snapshotting (replay after add/remove cycles does
/// not reproduce them bit-identically, so they round-trip explicitly).
pub trait WindowPolicy {
    fn on_add(&mut self, x: Sample);
    fn on_remove(&mut self, x: Sample);
    fn clear(&mut self);
    fn result(&self, window: &RingBuffer, count: usize) -> Sample;

    /// Running scalar state, in a fixed per-policy order.
    fn state(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Restore scalar state captured by [`WindowPolicy::state`].
    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        let _ = state;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// POLICIES
// ═══════════════════════════════════════════════════════════════════════════

/// Arithmetic mean
#[derive(Debug, Default, Clone)]
pub struct MeanPolicy {
    sum: f64,
}

impl WindowPolicy for MeanPolicy {
    fn on_add(&mut self, x: Sample) {
        self.sum += x as f64;
    }

    fn on_remove(&mut self, x: Sample) {
        self.sum -= x as f64;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
    }

    fn result(&self, _window: &RingBuffer, count: usize) -> Sample {
        if count == 0 {
            0.0
        } else {
            (self.sum / count as f64) as Sample
        }
    }

    fn state(&self) -> Vec<f64> {
        vec![self.sum]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        self.sum = *state.first().ok_or(SfError::CorruptSnapshot(
            "mean policy state missing".to_string(),
        ))?;
        Ok(())
    }
}

/// Root mean square
#[derive(Debug, Default, Clone)]
pub struct RmsPolicy {
    sum_sq: f64,
}

impl WindowPolicy for RmsPolicy {
    fn on_add(&mut self, x: Sample) {
        self.sum_sq += (x as f64) * (x as f64);
    }

    fn on_remove(&mut self, x: Sample) {
        self.sum_sq -= (x as f64) * (x as f64);
    }

    fn clear(&mut self) {
        self.sum_sq = 0.0;
    }

    fn result(&self, _window: &RingBuffer, count: usize) -> Sample {
        if count == 0 {
            0.0
        } else {
            (self.sum_sq.max(0.0) / count as f64).sqrt() as Sample
        }
    }

    fn state(&self) -> Vec<f64> {
        vec![self.sum_sq]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        self.sum_sq = *state.first().ok_or(SfError::CorruptSnapshot(
            "rms policy state missing".to_string(),
        ))?;
        Ok(())
    }
}

/// Mean absolute value
#[derive(Debug, Default, Clone)]
pub struct MeanAbsoluteValuePolicy {
    sum_abs: f64,
}

impl WindowPolicy for MeanAbsoluteValuePolicy {
    fn on_add(&mut self, x: Sample) {
        self.sum_abs += (x as f64).abs();
    }

    fn on_remove(&mut self, x: Sample) {
        self.sum_abs -= (x as f64).abs();
    }

    fn clear(&mut self) {
        self.sum_abs = 0.0;
    }

    fn result(&self, _window: &RingBuffer, count: usize) -> Sample {
        if count == 0 {
            0.0
        } else {
            (self.sum_abs / count as f64) as Sample
        }
    }

    fn state(&self) -> Vec<f64> {
        vec![self.sum_abs]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        self.sum_abs = *state.first().ok_or(SfError::CorruptSnapshot(
            "mav policy state missing".to_string(),
        ))?;
        Ok(())
    }
}

/// Population variance, clamped to >= 0 against cancellation.
#[derive(Debug, Default, Clone)]
pub struct VariancePolicy {
    sum: f64,
    sum_sq: f64,
}

impl VariancePolicy {
    /// Mean of the current window (used by z-score normalization).
    pub fn mean(&self, count: usize) -> f64 {
        if count == 0 {
            0.0
        } else {
            self.sum / count as f64
        }
    }

    pub fn variance(&self, count: usize) -> f64 {
        if count == 0 {
            return 0.0;
        }
        let n = count as f64;
        ((self.sum_sq - self.sum * self.sum / n) / n).max(0.0)
    }
}

impl WindowPolicy for VariancePolicy {
    fn on_add(&mut self, x: Sample) {
        self.sum += x as f64;
        self.sum_sq += (x as f64) * (x as f64);
    }

    fn on_remove(&mut self, x: Sample) {
        self.sum -= x as f64;
        self.sum_sq -= (x as f64) * (x as f64);
    }

    fn clear(&mut self) {
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }

    fn result(&self, _window: &RingBuffer, count: usize) -> Sample {
        self.variance(count) as Sample
    }

    fn state(&self) -> Vec<f64> {
        vec![self.sum, self.sum_sq]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        if state.len() < 2 {
            return Err(SfError::CorruptSnapshot(
                "variance policy state missing".to_string(),
            ));
        }
        self.sum = state[0];
        self.sum_sq = state[1];
        Ok(())
    }
}

/// Plain running sum (waveform length over |dx|).
#[derive(Debug, Default, Clone)]
pub struct SumPolicy {
    sum: f64,
}

impl WindowPolicy for SumPolicy {
    fn on_add(&mut self, x: Sample) {
        self.sum += x as f64;
    }

    fn on_remove(&mut self, x: Sample) {
        self.sum -= x as f64;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
    }

    fn result(&self, _window: &RingBuffer, _count: usize) -> Sample {
        self.sum as Sample
    }

    fn state(&self) -> Vec<f64> {
        vec![self.sum]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        self.sum = *state.first().ok_or(SfError::CorruptSnapshot(
            "sum policy state missing".to_string(),
        ))?;
        Ok(())
    }
}

/// Count of true boolean indicators in the window (SSC / WAMP).
/// Samples are treated as indicators: anything > 0.5 counts as true.
#[derive(Debug, Default, Clone)]
pub struct CounterPolicy {
    count: i64,
}

impl WindowPolicy for CounterPolicy {
    fn on_add(&mut self, x: Sample) {
        if x > 0.5 {
            self.count += 1;
        }
    }

    fn on_remove(&mut self, x: Sample) {
        if x > 0.5 {
            self.count -= 1;
        }
    }

    fn clear(&mut self) {
        self.count = 0;
    }

    fn result(&self, _window: &RingBuffer, _count: usize) -> Sample {
        self.count as Sample
    }

    fn state(&self) -> Vec<f64> {
        vec![self.count as f64]
    }

    fn restore(&mut self, state: &[f64]) -> SfResult<()> {
        self.count = *state.first().ok_or(SfError::CorruptSnapshot(
            "counter policy state missing".to_string(),
        ))? as i64;
        Ok(())
    }
}

/// Local-maxima count over the current window.
///
/// A sample is a peak when it exceeds both neighbours and the threshold, and
/// lies at least `min_distance` samples after the previously accepted peak.
/// No running aggregate; the window is scanned on demand.
#[derive(Debug, Clone)]
pub struct PeakDetectionPolicy {
    pub threshold: f64,
    pub min_distance: usize,
}

impl PeakDetectionPolicy {
    pub fn new(threshold: f64, min_distance: usize) -> Self {
        Self {
            threshold,
            min_distance: min_distance.max(1),
        }
    }
}

impl WindowPolicy for PeakDetectionPolicy {
    fn on_add(&mut self, _x: Sample) {}

    fn on_remove(&mut self, _x: Sample) {}

    fn clear(&mut self) {}

    fn result(&self, window: &RingBuffer, count: usize) -> Sample {
        if count < 3 {
            return 0.0;
        }
        let mut peaks = 0usize;
        let mut last_peak: Option<usize> = None;
        for i in 1..count - 1 {
            let prev = window.get(i - 1).unwrap_or(0.0) as f64;
            let cur = window.get(i).unwrap_or(0.0) as f64;
            let next = window.get(i + 1).unwrap_or(0.0) as f64;
            if cur > prev && cur >= next && cur > self.threshold {
                let far_enough = match last_peak {
                    Some(p) => i - p >= self.min_distance,
                    None => true,
                };
                if far_enough {
                    peaks += 1;
                    last_peak = Some(i);
                }
            }
        }
        peaks as Sample
    }
}

/// Streaming convolution against a pre-reversed kernel.
///
/// The result is the dot product of the reversed kernel and the current
/// window (oldest → newest), computed on demand via the SIMD kernels. No
/// running aggregate, so add/remove/clear are no-ops and the serialized
/// policy state is empty.
#[derive(Debug, Clone)]
pub struct ConvolutionPolicy {
    kernel_rev: Vec<Sample>,
}

impl ConvolutionPolicy {
    /// `kernel` in natural order; stored reversed.
    pub fn new(kernel: &[Sample]) -> Self {
        let mut kernel_rev = kernel.to_vec();
        kernel_rev.reverse();
        Self { kernel_rev }
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel_rev.len()
    }
}

impl WindowPolicy for ConvolutionPolicy {
    fn on_add(&mut self, _x: Sample) {}

    fn on_remove(&mut self, _x: Sample) {}

    fn clear(&mut self) {}

    fn result(&self, window: &RingBuffer, count: usize) -> Sample {
        if count == 0 {
            return 0.0;
        }
        let klen = self.kernel_rev.len();
        // Align the kernel tail to the newest sample during warmup.
        let used = count.min(klen);
        let kernel = &self.kernel_rev[klen - used..];
        let (a, b) = window.as_slices();
        // Window may start before the kernel's reach; skip the excess.
        let skip = count - used;
        let (a, b) = if skip < a.len() {
            (&a[skip..], b)
        } else {
            (&b[skip - a.len()..], &[][..])
        };
        let first = kernel.len().min(a.len());
        let mut acc = simd::dot_product(&kernel[..first], &a[..first]);
        if first < kernel.len() {
            acc += simd::dot_product(&kernel[first..], b);
        }
        acc as Sample
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Sliding-window engine: ring buffer + policy.
#[derive(Debug, Clone)]
pub struct SlidingWindow<P: WindowPolicy> {
    buffer: RingBuffer,
    policy: P,
    last_timestamp: Option<f64>,
}

impl<P: WindowPolicy> SlidingWindow<P> {
    /// Count-bounded window.
    pub fn new(size: usize, policy: P) -> Self {
        Self {
            buffer: RingBuffer::new(size.max(1)),
            policy,
            last_timestamp: None,
        }
    }

    /// Time-bounded window: at most `size` elements, and no element older
    /// than `window_ms` behind the newest.
    pub fn timed(size: usize, window_ms: f64, policy: P) -> Self {
        Self {
            buffer: RingBuffer::timed(size.max(1), window_ms),
            policy,
            last_timestamp: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// Push one sample, returning the policy result for the updated window.
    pub fn add_sample(&mut self, x: Sample) -> Sample {
        if self.buffer.is_full() {
            if let Ok(oldest) = self.buffer.peek() {
                self.policy.on_remove(oldest);
            }
        }
        self.buffer.push_overwrite(x);
        self.policy.on_add(x);
        self.policy.result(&self.buffer, self.buffer.len())
    }

    /// Timed push: expires stale elements first (rebuilding the policy by
    /// replay when anything expired), then the normal add path. Out-of-order
    /// timestamps fail with `NonMonotonic`.
    pub fn add_sample_timed(&mut self, x: Sample, t: TimestampMs) -> SfResult<Sample> {
        let t64 = t as f64;
        if let Some(prev) = self.last_timestamp {
            if t64 < prev {
                return Err(SfError::NonMonotonic {
                    previous: prev,
                    current: t64,
                });
            }
        }
        self.last_timestamp = Some(t64);

        let expired = self.buffer.expire_old(t64)?;
        if expired > 0 {
            self.policy.clear();
            let (a, b) = self.buffer.as_slices();
            // Replay has to copy: the policy borrow conflicts with the slices.
            let remaining: Vec<Sample> = a.iter().chain(b.iter()).copied().collect();
            for v in remaining {
                self.policy.on_add(v);
            }
        }

        if self.buffer.is_full() {
            if let Ok(oldest) = self.buffer.peek() {
                self.policy.on_remove(oldest);
            }
        }
        self.buffer.push_overwrite_timed(x, t)?;
        self.policy.on_add(x);
        Ok(self.policy.result(&self.buffer, self.buffer.len()))
    }

    /// Current result without pushing.
    pub fn current(&self) -> Sample {
        self.policy.result(&self.buffer, self.buffer.len())
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.policy.clear();
        self.last_timestamp = None;
    }

    /// Snapshot contents: (window samples, window timestamps, policy scalars).
    pub fn snapshot_state(&self) -> (Vec<Sample>, Vec<TimestampMs>, Vec<f64>) {
        (
            self.buffer.to_vec(),
            self.buffer.timestamps_to_vec(),
            self.policy.state(),
        )
    }

    /// Restore contents captured by [`SlidingWindow::snapshot_state`].
    pub fn restore_state(
        &mut self,
        samples: &[Sample],
        timestamps: &[TimestampMs],
        policy_state: &[f64],
    ) -> SfResult<()> {
        if self.buffer.is_timed() {
            let ts = if timestamps.len() == samples.len() {
                timestamps
            } else {
                return Err(SfError::CorruptSnapshot(
                    "timed window restored without matching timestamps".to_string(),
                ));
            };
            self.buffer.fill_from_timed(samples, ts)?;
            self.last_timestamp = self.buffer.newest_timestamp().map(|t| t as f64);
        } else {
            self.buffer.fill_from(samples);
        }
        self.policy.clear();
        if policy_state.is_empty() {
            // Rebuild by replay for stateless policies.
            let contents = self.buffer.to_vec();
            for v in contents {
                self.policy.on_add(v);
            }
        } else {
            self.policy.restore(policy_state)?;
        }
        Ok(())
    }
}
