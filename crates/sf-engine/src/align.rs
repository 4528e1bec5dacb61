//! Time alignment: irregular timestamped samples onto a uniform grid
//!
//! The stage consumes timestamped samples, estimates the effective input
//! rate (verbatim / regression / PLL), detects gaps against a threshold,
//! builds a uniform grid starting at the first input timestamp, and fills
//! each grid point by linear, cubic (Catmull-Rom) or windowed-sinc
//! interpolation over the bracketing samples. The grid and the retained
//! sample tail persist across calls, so successive buffers form one stream.

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::Stage;
use crate::StageParams;

/// Interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpMethod {
    Linear,
    Cubic,
    Sinc,
}

/// What to do inside a detected gap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPolicy {
    Error,
    ZeroFill,
    Hold,
    Interpolate,
    Extrapolate,
}

/// Effective-input-rate estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftMethod {
    /// Use the provided rate verbatim
    None,
    /// Least-squares slope of (index, timestamp)
    Regression,
    /// Exponentially smoothed instantaneous rate
    Pll,
}

/// Per-call statistics, retrievable after each process call.
#[derive(Debug, Clone, Default)]
pub struct AlignmentStats {
    pub input_samples: usize,
    pub output_samples: usize,
    pub gap_count: usize,
    pub estimated_input_rate: f64,
    pub interval_min: f64,
    pub interval_max: f64,
    pub interval_mean: f64,
    pub interval_std: f64,
    pub smallest_gap: f64,
    pub largest_gap: f64,
}

const PLL_ALPHA: f64 = 0.1;

/// Irregular-to-uniform resampling stage.
pub struct TimeAlignmentStage {
    target_rate: f64,
    nominal_input_rate: f64,
    method: InterpMethod,
    gap_policy: GapPolicy,
    gap_threshold: f64,
    drift: DriftMethod,
    sinc_half_width: usize,

    /// Shared timestamp track (ms) of the retained samples
    times: Vec<f64>,
    /// Per-channel values aligned with `times`
    values: Vec<Vec<Sample>>,
    /// Next grid time to emit; set from the first input timestamp
    next_grid_t: Option<f64>,
    /// PLL-smoothed interval estimate
    pll_interval: Option<f64>,
    /// Last effective input rate estimate (for the time scale factor)
    eff_rate: f64,
    last_input_t: Option<f64>,
    stats: AlignmentStats,
}

impl TimeAlignmentStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let target_rate = params.f64("targetSampleRate")?;
        if target_rate <= 0.0 {
            return Err(SfError::invalid(
                "parameter 'targetSampleRate' must be positive",
            ));
        }
        let nominal_input_rate = params.f64_or("sampleRate", target_rate)?;
        if nominal_input_rate <= 0.0 {
            return Err(SfError::invalid("parameter 'sampleRate' must be positive"));
        }
        let method = match params.str_or("interpolation", "linear")? {
            "linear" => InterpMethod::Linear,
            "cubic" => InterpMethod::Cubic,
            "sinc" => InterpMethod::Sinc,
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'interpolation' has unknown value \"{other}\""
                )))
            }
        };
        let gap_policy = match params.str_or("gapPolicy", "interpolate")? {
            "error" => GapPolicy::Error,
            "zeroFill" => GapPolicy::ZeroFill,
            "hold" => GapPolicy::Hold,
            "interpolate" => GapPolicy::Interpolate,
            "extrapolate" => GapPolicy::Extrapolate,
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'gapPolicy' has unknown value \"{other}\""
                )))
            }
        };
        let gap_threshold = params.f64_or("gapThreshold", 2.0)?;
        if gap_threshold <= 0.0 {
            return Err(SfError::invalid("parameter 'gapThreshold' must be positive"));
        }
        let drift = match params.str_or("driftCompensation", "none")? {
            "none" => DriftMethod::None,
            "regression" => DriftMethod::Regression,
            "pll" => DriftMethod::Pll,
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'driftCompensation' has unknown value \"{other}\""
                )))
            }
        };
        let sinc_half_width = params.usize_or("sincHalfWidth", 8)?.max(1);

        Ok(Self {
            target_rate,
            nominal_input_rate,
            method,
            gap_policy,
            gap_threshold,
            drift,
            sinc_half_width,
            times: Vec::new(),
            values: Vec::new(),
            next_grid_t: None,
            pll_interval: None,
            eff_rate: nominal_input_rate,
            last_input_t: None,
            stats: AlignmentStats::default(),
        })
    }

    /// Statistics of the most recent process call.
    pub fn last_stats(&self) -> &AlignmentStats {
        &self.stats
    }

    fn grid_interval(&self) -> f64 {
        1000.0 / self.target_rate
    }

    /// Samples worth of history the interpolators can reach behind the
    /// cursor.
    fn history_reach(&self) -> usize {
        match self.method {
            InterpMethod::Linear => 2,
            InterpMethod::Cubic => 4,
            InterpMethod::Sinc => 2 * self.sinc_half_width + 1,
        }
    }

    /// Estimate the effective input rate from this call's timestamps.
    fn estimate_rate(&mut self, new_times: &[f64]) {
        match self.drift {
            DriftMethod::None => {
                self.eff_rate = self.nominal_input_rate;
            }
            DriftMethod::Regression => {
                let n = new_times.len();
                if n >= 2 {
                    let nf = n as f64;
                    let sx = nf * (nf - 1.0) / 2.0;
                    let sxx = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
                    let sy: f64 = new_times.iter().sum();
                    let sxy: f64 = new_times
                        .iter()
                        .enumerate()
                        .map(|(i, &t)| i as f64 * t)
                        .sum();
                    let slope = (nf * sxy - sx * sy) / (nf * sxx - sx * sx);
                    if slope > 0.0 {
                        self.eff_rate = 1000.0 / slope;
                    }
                }
            }
            DriftMethod::Pll => {
                let mut prev = self.last_input_t;
                for &t in new_times {
                    if let Some(p) = prev {
                        let dt = t - p;
                        if dt > 0.0 {
                            let est = self.pll_interval.unwrap_or(dt);
                            self.pll_interval = Some(est + PLL_ALPHA * (dt - est));
                        }
                    }
                    prev = Some(t);
                }
                if let Some(interval) = self.pll_interval {
                    if interval > 0.0 {
                        self.eff_rate = 1000.0 / interval;
                    }
                }
            }
        }
    }

    fn expected_interval(&self) -> f64 {
        1000.0 / self.eff_rate
    }

    fn is_gap(&self, dt: f64) -> bool {
        dt > self.gap_threshold * self.expected_interval()
    }

    /// Value of channel `c` at grid time `t` with the bracket `[j, j+1]`.
    fn interpolate(&self, c: usize, j: usize, t: f64) -> Sample {
        let times = &self.times;
        let vals = &self.values[c];
        let n = times.len();
        let j1 = (j + 1).min(n - 1);
        let (t0, t1) = (times[j], times[j1]);
        let (v0, v1) = (vals[j] as f64, vals[j1] as f64);
        let span = t1 - t0;

        match self.method {
            InterpMethod::Linear => {
                if span <= 0.0 {
                    v0 as Sample
                } else {
                    (v0 + (v1 - v0) * (t - t0) / span) as Sample
                }
            }
            InterpMethod::Cubic => {
                if span <= 0.0 {
                    return v0 as Sample;
                }
                // Catmull-Rom with finite-difference tangents, clamped edges
                let jm = j.saturating_sub(1);
                let j2 = (j1 + 1).min(n - 1);
                let m0 = if times[j1] > times[jm] {
                    (vals[j1] as f64 - vals[jm] as f64) / (times[j1] - times[jm])
                } else {
                    0.0
                };
                let m1 = if times[j2] > times[j] {
                    (vals[j2] as f64 - vals[j] as f64) / (times[j2] - times[j])
                } else {
                    0.0
                };
                let s = (t - t0) / span;
                let s2 = s * s;
                let s3 = s2 * s;
                let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
                let h10 = s3 - 2.0 * s2 + s;
                let h01 = -2.0 * s3 + 3.0 * s2;
                let h11 = s3 - s2;
                (h00 * v0 + h10 * m0 * span + h01 * v1 + h11 * m1 * span) as Sample
            }
            InterpMethod::Sinc => {
                let half = self.sinc_half_width;
                let lo = j.saturating_sub(half);
                let hi = (j + half + 1).min(n);
                let dt = self.expected_interval();
                let mut acc = 0.0f64;
                let mut wsum = 0.0f64;
                let width = (hi - lo).max(1) as f64;
                for i in lo..hi {
                    let x = (t - times[i]) / dt;
                    let sinc = if x.abs() < 1e-9 {
                        1.0
                    } else {
                        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
                    };
                    // Hann taper over the support
                    let pos = (i - lo) as f64 / (width - 1.0).max(1.0);
                    let win = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * pos).cos());
                    let w = sinc * win.max(1e-6);
                    acc += w * vals[i] as f64;
                    wsum += w;
                }
                if wsum.abs() < 1e-12 {
                    v0 as Sample
                } else {
                    (acc / wsum) as Sample
                }
            }
        }
    }

    /// Fill a gap per policy; bracket `[j, j+1]` is known to be a gap.
    fn fill_gap(&self, c: usize, j: usize, t: f64) -> SfResult<Sample> {
        let times = &self.times;
        let vals = &self.values[c];
        match self.gap_policy {
            GapPolicy::Error => Err(SfError::stage(
                "timeAlignment",
                format!(
                    "gap of {:.3} ms at t={:.3} ms exceeds threshold",
                    times[j + 1] - times[j],
                    times[j]
                ),
            )),
            GapPolicy::ZeroFill => Ok(0.0),
            GapPolicy::Hold => Ok(vals[j]),
            GapPolicy::Interpolate => {
                let span = times[j + 1] - times[j];
                let v0 = vals[j] as f64;
                let v1 = vals[j + 1] as f64;
                Ok((v0 + (v1 - v0) * (t - times[j]) / span) as Sample)
            }
            GapPolicy::Extrapolate => {
                if j == 0 {
                    return Ok(vals[0]);
                }
                let span = times[j] - times[j - 1];
                if span <= 0.0 {
                    return Ok(vals[j]);
                }
                let slope = (vals[j] as f64 - vals[j - 1] as f64) / span;
                Ok((vals[j] as f64 + slope * (t - times[j])) as Sample)
            }
        }
    }

    /// Update the per-call interval/gap statistics.
    fn update_stats(&mut self, new_times: &[f64], prev_last: Option<f64>) {
        let mut intervals = Vec::new();
        let mut prev = prev_last;
        for &t in new_times {
            if let Some(p) = prev {
                intervals.push(t - p);
            }
            prev = Some(t);
        }
        self.stats.input_samples = new_times.len();
        self.stats.estimated_input_rate = self.eff_rate;
        self.stats.gap_count = 0;
        self.stats.smallest_gap = f64::INFINITY;
        self.stats.largest_gap = 0.0;
        if intervals.is_empty() {
            self.stats.interval_min = 0.0;
            self.stats.interval_max = 0.0;
            self.stats.interval_mean = 0.0;
            self.stats.interval_std = 0.0;
            self.stats.smallest_gap = 0.0;
            return;
        }
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let var = intervals.iter().map(|&d| (d - mean) * (d - mean)).sum::<f64>() / n;
        self.stats.interval_min = intervals.iter().copied().fold(f64::INFINITY, f64::min);
        self.stats.interval_max = intervals.iter().copied().fold(0.0, f64::max);
        self.stats.interval_mean = mean;
        self.stats.interval_std = var.sqrt();
        for &d in &intervals {
            if self.is_gap(d) {
                self.stats.gap_count += 1;
                self.stats.smallest_gap = self.stats.smallest_gap.min(d);
                self.stats.largest_gap = self.stats.largest_gap.max(d);
            }
        }
        if self.stats.gap_count == 0 {
            self.stats.smallest_gap = 0.0;
        }
    }
}

impl Stage for TimeAlignmentStage {
    fn stage_type(&self) -> &'static str {
        "timeAlignment"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        // conservative: rate ratio plus slack for buffered history
        let ratio = (self.target_rate / self.eff_rate).max(1.0);
        (input_samples as f64 * ratio).ceil() as usize + 2
    }

    fn time_scale_factor(&self) -> f64 {
        self.eff_rate / self.target_rate
    }

    fn process(
        &mut self,
        _samples: &mut [Sample],
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        Err(SfError::stage(self.stage_type(), "resizing stage"))
    }

    fn process_resizing(
        &mut self,
        input: &[Sample],
        output: &mut Vec<Sample>,
        channels: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        let ts = timestamps.ok_or_else(|| {
            SfError::invalid("timeAlignment requires timestamps (or a sampleRate)")
        })?;
        let frames = input.len() / channels;
        while self.values.len() < channels {
            self.values.push(Vec::new());
        }

        // ingest, enforcing monotonic timestamps
        let prev_last = self.last_input_t;
        let mut new_times = Vec::with_capacity(frames);
        for i in 0..frames {
            let t = ts[i * channels] as f64;
            if let Some(last) = self.last_input_t {
                if t < last {
                    return Err(SfError::NonMonotonic {
                        previous: last,
                        current: t,
                    });
                }
            }
            self.last_input_t = Some(t);
            new_times.push(t);
            self.times.push(t);
            for c in 0..channels {
                self.values[c].push(input[i * channels + c]);
            }
        }

        self.estimate_rate(&new_times);
        self.update_stats(&new_times, prev_last);

        if self.next_grid_t.is_none() {
            self.next_grid_t = self.times.first().copied();
        }

        // emit grid points covered by the available input span
        let mut emitted = 0usize;
        if let (Some(mut grid_t), Some(&t_last)) = (self.next_grid_t, self.times.last()) {
            let step = self.grid_interval();
            let mut cursor = 0usize;
            while grid_t <= t_last + 1e-9 {
                // advance the (monotonic) cursor to the bracketing interval
                while cursor + 1 < self.times.len() && self.times[cursor + 1] < grid_t {
                    cursor += 1;
                }
                let j = cursor;
                let j1 = (j + 1).min(self.times.len() - 1);
                let dt = self.times[j1] - self.times[j];
                for c in 0..channels {
                    let v = if j1 > j && self.is_gap(dt) {
                        self.fill_gap(c, j, grid_t)?
                    } else {
                        self.interpolate(c, j, grid_t)
                    };
                    output.push(v);
                }
                emitted += 1;
                grid_t += step;
            }
            self.next_grid_t = Some(grid_t);

            // trim consumed history, keeping the interpolator's reach
            let keep_from = cursor.saturating_sub(self.history_reach());
            if keep_from > 0 {
                self.times.drain(..keep_from);
                for chan in &mut self.values {
                    chan.drain(..keep_from);
                }
            }
        }

        self.stats.output_samples = emitted;
        log::debug!(
            "timeAlignment: {} in, {} out, {} gaps, est rate {:.2} Hz",
            self.stats.input_samples,
            emitted,
            self.stats.gap_count,
            self.stats.estimated_input_rate
        );

        Ok(emitted * channels)
    }

    fn reset(&mut self) {
        self.times.clear();
        self.values.clear();
        self.next_grid_t = None;
        self.pll_interval = None;
        self.eff_rate = self.nominal_input_rate;
        self.last_input_t = None;
        self.stats = AlignmentStats::default();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("times");
        let times: Vec<Sample> = self.times.iter().map(|&t| t as Sample).collect();
        w.write_f32_array(&times);
        w.field("values");
        w.begin_array();
        for chan in &self.values {
            w.write_f32_array(chan);
        }
        w.end_array();
        w.field("nextGridT");
        match self.next_grid_t {
            Some(t) => w.write_f64(t),
            None => w.write_null(),
        }
        w.field("pllInterval");
        match self.pll_interval {
            Some(v) => w.write_f64(v),
            None => w.write_null(),
        }
        w.field("effRate");
        w.write_f64(self.eff_rate);
        w.field("lastInputT");
        match self.last_input_t {
            Some(t) => w.write_f64(t),
            None => w.write_null(),
        }
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("times")?;
        self.times = r.read_f32_array()?.into_iter().map(|t| t as f64).collect();
        r.expect_field("values")?;
        r.expect_array_start()?;
        self.values.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            self.values.push(r.read_f32_array()?);
        }
        r.expect_array_end()?;
        r.expect_field("nextGridT")?;
        self.next_grid_t = match r.peek_tag()? {
            sf_state::Tag::Null => {
                r.read_tag()?;
                None
            }
            _ => Some(r.read_f64()?),
        };
        r.expect_field("pllInterval")?;
        self.pll_interval = match r.peek_tag()? {
            sf_state::Tag::Null => {
                r.read_tag()?;
                None
            }
            _ => Some(r.read_f64()?),
        };
        r.expect_field("effRate")?;
        self.eff_rate = r.read_f64()?;
        r.expect_field("lastInputT")?;
        self.last_input_t = match r.peek_tag()? {
            sf_state::Tag::Null => {
                r.read_tag()?;
                None
            }
            _ => Some(r.read_f64()?),
        };
        r.expect_object_end()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn interleave_ts(times: &[f64], channels: usize) -> Vec<TimestampMs> {
        let mut out = Vec::with_capacity(times.len() * channels);
        for &t in times {
            for _ in 0..channels {
                out.push(t as TimestampMs);
            }
        }
        out
    }

    #[test]
    fn linear_alignment_onto_millisecond_grid() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0,
            "interpolation": "linear",
            "gapPolicy": "interpolate",
            "gapThreshold": 2.0
        }))
        .unwrap();
        let times = [0.0, 0.9, 2.1, 3.0, 4.2];
        let input = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ts = interleave_ts(&times, 1);
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, Some(&ts)).unwrap();
        assert_eq!(produced, 5); // grid 0,1,2,3,4 ms
        let expected = [0.0, 1.0833, 1.9167, 3.0, 3.8333];
        for (i, (&got, &want)) in out.iter().zip(&expected).enumerate() {
            assert!((got - want).abs() < 1e-3, "grid point {i}: {got} vs {want}");
        }
        let stats = s.last_stats();
        assert_eq!(stats.input_samples, 5);
        assert_eq!(stats.output_samples, 5);
        assert_eq!(stats.gap_count, 0);
    }

    #[test]
    fn grid_continues_across_calls() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0
        }))
        .unwrap();
        // uniform 1 ms input split across two calls: alignment is identity
        let t1 = [0.0, 1.0, 2.0];
        let v1 = [0.0, 1.0, 2.0];
        let mut out = Vec::new();
        s.process_resizing(&v1, &mut out, 1, Some(&interleave_ts(&t1, 1)))
            .unwrap();
        let t2 = [3.0, 4.0];
        let v2 = [3.0, 4.0];
        s.process_resizing(&v2, &mut out, 1, Some(&interleave_ts(&t2, 1)))
            .unwrap();
        assert_eq!(out.len(), 5);
        for (i, &v) in out.iter().enumerate() {
            assert!((v - i as f32).abs() < 1e-4);
        }
    }

    #[test]
    fn gap_policies_differ() {
        let times = [0.0, 1.0, 5.0, 6.0];
        let input = [0.0, 1.0, 5.0, 6.0];
        let run = |policy: &str| -> Vec<Sample> {
            let mut s = TimeAlignmentStage::from_params(&params!({
                "targetSampleRate": 1000.0,
                "gapPolicy": policy,
                "gapThreshold": 2.0
            }))
            .unwrap();
            let mut out = Vec::new();
            s.process_resizing(&input, &mut out, 1, Some(&interleave_ts(&times, 1)))
                .unwrap();
            out
        };
        let hold = run("hold");
        let zero = run("zeroFill");
        let interp = run("interpolate");
        // grid 0..=6; points 2,3,4 fall in the gap (1..5)
        assert_eq!(hold[3], 1.0);
        assert_eq!(zero[3], 0.0);
        assert!((interp[3] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn gap_error_policy_fails() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0,
            "gapPolicy": "error",
            "gapThreshold": 2.0
        }))
        .unwrap();
        let times = [0.0, 1.0, 10.0];
        let input = [0.0, 1.0, 2.0];
        let mut out = Vec::new();
        let err = s
            .process_resizing(&input, &mut out, 1, Some(&interleave_ts(&times, 1)))
            .unwrap_err();
        assert!(matches!(err, SfError::Stage { .. }));
    }

    #[test]
    fn out_of_order_timestamps_rejected() {
        let mut s = TimeAlignmentStage::from_params(&params!({"targetSampleRate": 1000.0})).unwrap();
        let times = [0.0, 2.0, 1.0];
        let input = [0.0, 1.0, 2.0];
        let mut out = Vec::new();
        assert!(matches!(
            s.process_resizing(&input, &mut out, 1, Some(&interleave_ts(&times, 1))),
            Err(SfError::NonMonotonic { .. })
        ));
    }

    #[test]
    fn regression_estimates_input_rate() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0,
            "driftCompensation": "regression"
        }))
        .unwrap();
        // 2 ms spacing -> 500 Hz
        let times: Vec<f64> = (0..50).map(|i| i as f64 * 2.0).collect();
        let input: Vec<Sample> = (0..50).map(|i| i as Sample).collect();
        let mut out = Vec::new();
        s.process_resizing(&input, &mut out, 1, Some(&interleave_ts(&times, 1)))
            .unwrap();
        assert!((s.last_stats().estimated_input_rate - 500.0).abs() < 1.0);
        assert!((s.time_scale_factor() - 0.5).abs() < 0.01);
    }

    #[test]
    fn cubic_reproduces_smooth_signal() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0,
            "interpolation": "cubic"
        }))
        .unwrap();
        // slightly jittered 1 ms sampling of a smooth ramp
        let times: Vec<f64> = (0..40)
            .map(|i| i as f64 + if i % 2 == 0 { 0.0 } else { 0.2 })
            .collect();
        let input: Vec<Sample> = times.iter().map(|&t| (0.1 * t) as Sample).collect();
        let mut out = Vec::new();
        s.process_resizing(&input, &mut out, 1, Some(&interleave_ts(&times, 1)))
            .unwrap();
        for (k, &v) in out.iter().enumerate() {
            let want = 0.1 * k as f32;
            assert!((v - want).abs() < 1e-3, "grid {k}: {v} vs {want}");
        }
    }

    #[test]
    fn multichannel_alignment_keeps_channels_independent() {
        let mut s = TimeAlignmentStage::from_params(&params!({
            "targetSampleRate": 1000.0
        }))
        .unwrap();
        let times = [0.0, 1.0, 2.0, 3.0];
        // ch0 ramp, ch1 constant
        let input = [0.0, 7.0, 1.0, 7.0, 2.0, 7.0, 3.0, 7.0];
        let ts = interleave_ts(&times, 2);
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 2, Some(&ts)).unwrap();
        assert_eq!(produced, 8);
        for i in 0..4 {
            assert!((out[2 * i] - i as f32).abs() < 1e-4);
            assert!((out[2 * i + 1] - 7.0).abs() < 1e-4);
        }
    }
}
