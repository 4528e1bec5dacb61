//! Moving/batch statistics stages
//!
//! movingAverage, rms, variance, meanAbsoluteValue share one generic adapter
//! over the sliding-window policies; zScoreNormalize, snr,
//! cumulativeMovingAverage and exponentialMovingAverage have their own state.

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::simd;
use sf_dsp::sliding::{
    MeanAbsoluteValuePolicy, MeanPolicy, RmsPolicy, SlidingWindow, VariancePolicy, WindowPolicy,
};
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, read_window, write_window, Stage, WindowSpec};
use crate::StageParams;

/// Moving vs batch computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMode {
    Moving,
    Batch,
}

impl StatMode {
    fn from_params(params: &StageParams) -> SfResult<Self> {
        match params.str_or("mode", "moving")? {
            "moving" => Ok(Self::Moving),
            "batch" => Ok(Self::Batch),
            other => Err(SfError::invalid(format!(
                "parameter 'mode' must be \"moving\" or \"batch\", got \"{other}\""
            ))),
        }
    }
}

/// Ties a window policy to a stage type and its batch aggregate.
pub trait StatPolicy: WindowPolicy + Clone + Default + Send + 'static {
    const STAGE_TYPE: &'static str;
    fn batch(samples: &[Sample]) -> Sample;
}

impl StatPolicy for MeanPolicy {
    const STAGE_TYPE: &'static str = "movingAverage";

    fn batch(samples: &[Sample]) -> Sample {
        if samples.is_empty() {
            0.0
        } else {
            (simd::sum(samples) / samples.len() as f64) as Sample
        }
    }
}

impl StatPolicy for RmsPolicy {
    const STAGE_TYPE: &'static str = "rms";

    fn batch(samples: &[Sample]) -> Sample {
        if samples.is_empty() {
            0.0
        } else {
            (simd::sum_of_squares(samples) / samples.len() as f64).sqrt() as Sample
        }
    }
}

impl StatPolicy for VariancePolicy {
    const STAGE_TYPE: &'static str = "variance";

    fn batch(samples: &[Sample]) -> Sample {
        if samples.is_empty() {
            return 0.0;
        }
        let n = samples.len() as f64;
        let sum = simd::sum(samples);
        let sum_sq = simd::sum_of_squares(samples);
        (((sum_sq - sum * sum / n) / n).max(0.0)) as Sample
    }
}

impl StatPolicy for MeanAbsoluteValuePolicy {
    const STAGE_TYPE: &'static str = "meanAbsoluteValue";

    fn batch(samples: &[Sample]) -> Sample {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&x| (x as f64).abs()).sum();
        (sum / samples.len() as f64) as Sample
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GENERIC STAT STAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Shared adapter for the window-policy statistics.
pub struct StatStage<P: StatPolicy> {
    mode: StatMode,
    spec: Option<WindowSpec>,
    resolved: Option<usize>,
    windows: Vec<SlidingWindow<P>>,
    scratch: Vec<Sample>,
}

impl<P: StatPolicy> StatStage<P> {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let mode = StatMode::from_params(params)?;
        let spec = match mode {
            StatMode::Moving => Some(WindowSpec::from_params(params)?),
            StatMode::Batch => None,
        };
        Ok(Self {
            mode,
            spec,
            resolved: None,
            windows: Vec::new(),
            scratch: Vec::new(),
        })
    }

    fn window_size(
        &mut self,
        channels: usize,
        len: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        if let Some(size) = self.resolved {
            return Ok(size);
        }
        let spec = self
            .spec
            .as_ref()
            .expect("moving mode always carries a window spec");
        let size = spec.resolve(channels, len, timestamps)?;
        self.resolved = Some(size);
        Ok(size)
    }
}

impl<P: StatPolicy> Stage for StatStage<P> {
    fn stage_type(&self) -> &'static str {
        P::STAGE_TYPE
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let frames = samples.len() / channels;
        match self.mode {
            StatMode::Moving => {
                let size = self.window_size(channels, samples.len(), timestamps)?;
                ensure_channels(&mut self.windows, channels, || {
                    SlidingWindow::new(size, P::default())
                });
                for i in 0..frames {
                    for c in 0..channels {
                        let idx = i * channels + c;
                        samples[idx] = self.windows[c].add_sample(samples[idx]);
                    }
                }
            }
            StatMode::Batch => {
                self.scratch.resize(frames, 0.0);
                for c in 0..channels {
                    simd::extract_channel(samples, channels, c, &mut self.scratch);
                    let value = P::batch(&self.scratch[..frames]);
                    for i in 0..frames {
                        samples[i * channels + c] = value;
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.resolved = match self.spec {
            Some(WindowSpec::Size(s)) => Some(s),
            _ => None,
        };
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("windowSize");
        w.write_i32(self.resolved.unwrap_or(0) as i32);
        w.field("windows");
        w.begin_array();
        for sw in &self.windows {
            write_window(w, sw);
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("windowSize")?;
        let size = r.read_i32()?;
        self.resolved = if size > 0 { Some(size as usize) } else { None };
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(self.resolved.unwrap_or(1), P::default());
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Z-SCORE NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════

/// `(x - mean) / (std + epsilon)` over a moving window or the whole buffer.
pub struct ZScoreStage {
    mode: StatMode,
    spec: Option<WindowSpec>,
    resolved: Option<usize>,
    epsilon: f64,
    windows: Vec<SlidingWindow<VariancePolicy>>,
    scratch: Vec<Sample>,
}

impl ZScoreStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let mode = StatMode::from_params(params)?;
        let spec = match mode {
            StatMode::Moving => Some(WindowSpec::from_params(params)?),
            StatMode::Batch => None,
        };
        let epsilon = params.f64_or("epsilon", 1e-9)?;
        if epsilon < 0.0 {
            return Err(SfError::invalid("parameter 'epsilon' must be non-negative"));
        }
        Ok(Self {
            mode,
            spec,
            resolved: None,
            epsilon,
            windows: Vec::new(),
            scratch: Vec::new(),
        })
    }
}

impl Stage for ZScoreStage {
    fn stage_type(&self) -> &'static str {
        "zScoreNormalize"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let frames = samples.len() / channels;
        match self.mode {
            StatMode::Moving => {
                if self.resolved.is_none() {
                    let spec = self.spec.as_ref().expect("moving mode has a spec");
                    self.resolved = Some(spec.resolve(channels, samples.len(), timestamps)?);
                }
                let size = self.resolved.unwrap_or(1);
                ensure_channels(&mut self.windows, channels, || {
                    SlidingWindow::new(size, VariancePolicy::default())
                });
                for i in 0..frames {
                    for c in 0..channels {
                        let idx = i * channels + c;
                        let x = samples[idx];
                        self.windows[c].add_sample(x);
                        let count = self.windows[c].len();
                        let policy = self.windows[c].policy();
                        let mean = policy.mean(count);
                        let std = policy.variance(count).sqrt();
                        samples[idx] = ((x as f64 - mean) / (std + self.epsilon)) as Sample;
                    }
                }
            }
            StatMode::Batch => {
                self.scratch.resize(frames, 0.0);
                for c in 0..channels {
                    simd::extract_channel(samples, channels, c, &mut self.scratch);
                    let slice = &self.scratch[..frames];
                    let n = frames.max(1) as f64;
                    let mean = simd::sum(slice) / n;
                    let var =
                        ((simd::sum_of_squares(slice) - mean * mean * n) / n).max(0.0);
                    let denom = var.sqrt() + self.epsilon;
                    for i in 0..frames {
                        let idx = i * channels + c;
                        samples[idx] = ((samples[idx] as f64 - mean) / denom) as Sample;
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.resolved = match self.spec {
            Some(WindowSpec::Size(s)) => Some(s),
            _ => None,
        };
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("windowSize");
        w.write_i32(self.resolved.unwrap_or(0) as i32);
        w.field("windows");
        w.begin_array();
        for sw in &self.windows {
            write_window(w, sw);
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("windowSize")?;
        let size = r.read_i32()?;
        self.resolved = if size > 0 { Some(size as usize) } else { None };
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(self.resolved.unwrap_or(1), VariancePolicy::default());
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CUMULATIVE / EXPONENTIAL MOVING AVERAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Running mean over the entire stream.
pub struct CumulativeMovingAverageStage {
    counts: Vec<u64>,
    means: Vec<f64>,
}

impl CumulativeMovingAverageStage {
    pub fn from_params(_params: &StageParams) -> SfResult<Self> {
        Ok(Self {
            counts: Vec::new(),
            means: Vec::new(),
        })
    }
}

impl Stage for CumulativeMovingAverageStage {
    fn stage_type(&self) -> &'static str {
        "cumulativeMovingAverage"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        ensure_channels(&mut self.counts, channels, || 0);
        ensure_channels(&mut self.means, channels, || 0.0);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let n = self.counts[c] + 1;
                self.means[c] += (samples[idx] as f64 - self.means[c]) / n as f64;
                self.counts[c] = n;
                samples[idx] = self.means[c] as Sample;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.counts.clear();
        self.means.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for (count, mean) in self.counts.iter().zip(&self.means) {
            w.write_f64(*count as f64);
            w.write_f64(*mean);
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.counts.clear();
        self.means.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            self.counts.push(r.read_f64()? as u64);
            self.means.push(r.read_f64()?);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

/// First-order exponential smoothing, primed by the first sample.
pub struct ExponentialMovingAverageStage {
    alpha: f64,
    states: Vec<Option<f64>>,
}

impl ExponentialMovingAverageStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let alpha = params.f64_or("alpha", 0.1)?;
        if !(0.0..=1.0).contains(&alpha) || alpha == 0.0 {
            return Err(SfError::invalid("parameter 'alpha' must lie in (0, 1]"));
        }
        Ok(Self {
            alpha,
            states: Vec::new(),
        })
    }
}

impl Stage for ExponentialMovingAverageStage {
    fn stage_type(&self) -> &'static str {
        "exponentialMovingAverage"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        ensure_channels(&mut self.states, channels, || None);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx] as f64;
                let ema = match self.states[c] {
                    None => x,
                    Some(prev) => prev + self.alpha * (x - prev),
                };
                self.states[c] = Some(ema);
                samples[idx] = ema as Sample;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.states.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for state in &self.states {
            match state {
                Some(v) => w.write_f64(*v),
                None => w.write_null(),
            }
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.states.clear();
        loop {
            match r.peek_tag()? {
                sf_state::Tag::ArrayEnd => break,
                sf_state::Tag::Null => {
                    r.read_tag()?;
                    self.states.push(None);
                }
                _ => self.states.push(Some(r.read_f64()?)),
            }
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SNR
// ═══════════════════════════════════════════════════════════════════════════

/// Windowed signal-to-noise estimate: `10 log10(mean^2 / (variance + eps))`.
pub struct SnrStage {
    spec: WindowSpec,
    resolved: Option<usize>,
    epsilon: f64,
    windows: Vec<SlidingWindow<VariancePolicy>>,
}

impl SnrStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        Ok(Self {
            spec: WindowSpec::from_params(params)?,
            resolved: None,
            epsilon: params.f64_or("epsilon", 1e-12)?,
            windows: Vec::new(),
        })
    }
}

impl Stage for SnrStage {
    fn stage_type(&self) -> &'static str {
        "snr"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        if self.resolved.is_none() {
            self.resolved = Some(self.spec.resolve(channels, samples.len(), timestamps)?);
        }
        let size = self.resolved.unwrap_or(1);
        ensure_channels(&mut self.windows, channels, || {
            SlidingWindow::new(size, VariancePolicy::default())
        });
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                self.windows[c].add_sample(samples[idx]);
                let count = self.windows[c].len();
                let policy = self.windows[c].policy();
                let mean = policy.mean(count);
                let var = policy.variance(count);
                let ratio = (mean * mean) / (var + self.epsilon);
                samples[idx] = (10.0 * ratio.max(1e-30).log10()) as Sample;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.resolved = match self.spec {
            WindowSpec::Size(s) => Some(s),
            _ => None,
        };
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("windowSize");
        w.write_i32(self.resolved.unwrap_or(0) as i32);
        w.field("windows");
        w.begin_array();
        for sw in &self.windows {
            write_window(w, sw);
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("windowSize")?;
        let size = r.read_i32()?;
        self.resolved = if size > 0 { Some(size as usize) } else { None };
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(self.resolved.unwrap_or(1), VariancePolicy::default());
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn moving_average_streams_across_buffers() {
        let mut stage =
            StatStage::<MeanPolicy>::from_params(&params!({"mode": "moving", "windowSize": 3}))
                .unwrap();
        let mut a = vec![1.0, 2.0, 3.0];
        stage.process(&mut a, 1, None).unwrap();
        let mut b = vec![4.0, 5.0];
        stage.process(&mut b, 1, None).unwrap();
        let all: Vec<Sample> = a.into_iter().chain(b).collect();
        assert_eq!(all, vec![1.0, 1.5, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn batch_mode_fills_with_aggregate() {
        let mut stage =
            StatStage::<MeanPolicy>::from_params(&params!({"mode": "batch"})).unwrap();
        let mut buf = vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0];
        stage.process(&mut buf, 2, None).unwrap();
        assert_eq!(buf, vec![2.0, 6.0, 2.0, 6.0, 2.0, 6.0]);
    }

    #[test]
    fn moving_and_batch_agree_on_window_sized_buffer() {
        let data = [0.5, -1.5, 2.5, 0.25];
        let mut moving =
            StatStage::<RmsPolicy>::from_params(&params!({"mode": "moving", "windowSize": 4}))
                .unwrap();
        let mut batch = StatStage::<RmsPolicy>::from_params(&params!({"mode": "batch"})).unwrap();
        let mut a = data.to_vec();
        moving.process(&mut a, 1, None).unwrap();
        let mut b = data.to_vec();
        batch.process(&mut b, 1, None).unwrap();
        // last moving output covers the full window = batch value
        assert!((a[3] - b[3]).abs() < 1e-6);
    }

    #[test]
    fn zscore_normalizes_batch() {
        let mut stage =
            ZScoreStage::from_params(&params!({"mode": "batch", "epsilon": 0.0})).unwrap();
        let mut buf = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        stage.process(&mut buf, 1, None).unwrap();
        let mean: f32 = buf.iter().sum::<f32>() / 5.0;
        assert!(mean.abs() < 1e-6);
        assert!((buf[0] + buf[4]).abs() < 1e-6); // symmetric
    }

    #[test]
    fn cma_converges_to_stream_mean() {
        let mut stage = CumulativeMovingAverageStage::from_params(&params!({})).unwrap();
        let mut buf = vec![2.0; 100];
        stage.process(&mut buf, 1, None).unwrap();
        assert!((buf[99] - 2.0).abs() < 1e-6);
        let mut next = vec![4.0; 100];
        stage.process(&mut next, 1, None).unwrap();
        // mean of 100 twos and 100 fours
        assert!((next[99] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn ema_primes_with_first_sample() {
        let mut stage =
            ExponentialMovingAverageStage::from_params(&params!({"alpha": 0.5})).unwrap();
        let mut buf = vec![10.0, 0.0];
        stage.process(&mut buf, 1, None).unwrap();
        assert_eq!(buf[0], 10.0);
        assert_eq!(buf[1], 5.0);
    }

    #[test]
    fn window_duration_resolves_once() {
        let mut stage = StatStage::<MeanPolicy>::from_params(
            &params!({"mode": "moving", "windowDuration": 3.0}),
        )
        .unwrap();
        // 1 ms spacing -> window of 3 samples
        let ts: Vec<TimestampMs> = (0..4).map(|i| i as TimestampMs).collect();
        let mut buf = vec![1.0, 2.0, 3.0, 4.0];
        stage.process(&mut buf, 1, Some(&ts)).unwrap();
        assert_eq!(stage.resolved, Some(3));
        // second buffer with different spacing must not re-resolve
        let ts2: Vec<TimestampMs> = (0..4).map(|i| (10 * i) as TimestampMs).collect();
        let mut buf2 = vec![5.0, 6.0, 7.0, 8.0];
        stage.process(&mut buf2, 1, Some(&ts2)).unwrap();
        assert_eq!(stage.resolved, Some(3));
    }

    #[test]
    fn snapshot_round_trip_continues_stream() {
        let mut stage =
            StatStage::<VariancePolicy>::from_params(&params!({"mode": "moving", "windowSize": 4}))
                .unwrap();
        let mut warm: Vec<Sample> = (0..10).map(|i| (i as Sample).cos()).collect();
        stage.process(&mut warm, 1, None).unwrap();

        let mut w = SnapshotWriter::new();
        stage.save_state(&mut w);
        let bytes = w.into_bytes();

        let mut fresh =
            StatStage::<VariancePolicy>::from_params(&params!({"mode": "moving", "windowSize": 4}))
                .unwrap();
        let mut r = SnapshotReader::new(&bytes);
        fresh.load_state(&mut r).unwrap();

        let mut a: Vec<Sample> = (10..20).map(|i| (i as Sample).cos()).collect();
        let mut b = a.clone();
        stage.process(&mut a, 1, None).unwrap();
        fresh.process(&mut b, 1, None).unwrap();
        assert_eq!(a, b);
    }
}
