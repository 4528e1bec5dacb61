//! Feature-extraction stages: waveform length, slope-sign change, Willison
//! amplitude, peak detection and windowed linear regression.

use sf_core::{RingBuffer, Sample, SfError, SfResult, TimestampMs};
use sf_dsp::sliding::{CounterPolicy, PeakDetectionPolicy, SlidingWindow, SumPolicy};
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, read_window, write_window, Stage};
use crate::StageParams;

// ═══════════════════════════════════════════════════════════════════════════
// WAVEFORM LENGTH
// ═══════════════════════════════════════════════════════════════════════════

/// Sum of |dx| over a sliding window. The first sample of a stream
/// contributes no difference.
pub struct WaveformLengthStage {
    window_size: usize,
    windows: Vec<SlidingWindow<SumPolicy>>,
    prev: Vec<Option<f64>>,
}

impl WaveformLengthStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let window_size = params.usize("windowSize")?;
        if window_size == 0 {
            return Err(SfError::invalid("parameter 'windowSize' must be positive"));
        }
        Ok(Self {
            window_size,
            windows: Vec::new(),
            prev: Vec::new(),
        })
    }
}

impl Stage for WaveformLengthStage {
    fn stage_type(&self) -> &'static str {
        "waveformLength"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let size = self.window_size;
        ensure_channels(&mut self.windows, channels, || {
            SlidingWindow::new(size, SumPolicy::default())
        });
        ensure_channels(&mut self.prev, channels, || None);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx] as f64;
                let diff = match self.prev[c] {
                    None => 0.0,
                    Some(p) => (x - p).abs(),
                };
                self.prev[c] = Some(x);
                samples[idx] = self.windows[c].add_sample(diff as Sample);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.prev.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("prev");
        w.begin_array();
        for p in &self.prev {
            match p {
                Some(v) => w.write_f64(*v),
                None => w.write_null(),
            }
        }
        w.end_array();
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
        r.expect_field("prev")?;
        r.expect_array_start()?;
        self.prev.clear();
        loop {
            match r.peek_tag()? {
                sf_state::Tag::ArrayEnd => break,
                sf_state::Tag::Null => {
                    r.read_tag()?;
                    self.prev.push(None);
                }
                _ => self.prev.push(Some(r.read_f64()?)),
            }
        }
        r.expect_array_end()?;
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(self.window_size, SumPolicy::default());
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INDICATOR-COUNT STAGES (SSC / WAMP)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndicatorKind {
    /// Slope-sign change: `(x1 - x2)(x1 - x0) >= threshold`
    SlopeSignChange,
    /// Willison amplitude: `|dx| > threshold`
    WillisonAmplitude,
}

/// Counts boolean indicators over a sliding window (SSC, WAMP).
pub struct IndicatorCountStage {
    kind: IndicatorKind,
    window_size: usize,
    threshold: f64,
    windows: Vec<SlidingWindow<CounterPolicy>>,
    hist: Vec<[Option<f64>; 2]>,
}

impl IndicatorCountStage {
    fn new(kind: IndicatorKind, params: &StageParams) -> SfResult<Self> {
        let window_size = params.usize("windowSize")?;
        if window_size == 0 {
            return Err(SfError::invalid("parameter 'windowSize' must be positive"));
        }
        let threshold = params.f64_or("threshold", 0.0)?;
        if threshold < 0.0 {
            return Err(SfError::invalid("parameter 'threshold' must be non-negative"));
        }
        Ok(Self {
            kind,
            window_size,
            threshold,
            windows: Vec::new(),
            hist: Vec::new(),
        })
    }

    pub fn slope_sign_change(params: &StageParams) -> SfResult<Self> {
        Self::new(IndicatorKind::SlopeSignChange, params)
    }

    pub fn willison_amplitude(params: &StageParams) -> SfResult<Self> {
        Self::new(IndicatorKind::WillisonAmplitude, params)
    }

    fn indicator(&self, hist: &[Option<f64>; 2], x: f64) -> bool {
        match self.kind {
            IndicatorKind::SlopeSignChange => match (hist[0], hist[1]) {
                // hist[0] = x[n-1], hist[1] = x[n-2]
                (Some(x1), Some(x2)) => (x1 - x2) * (x1 - x) >= self.threshold,
                _ => false,
            },
            IndicatorKind::WillisonAmplitude => match hist[0] {
                Some(prev) => (x - prev).abs() > self.threshold,
                None => false,
            },
        }
    }
}

impl Stage for IndicatorCountStage {
    fn stage_type(&self) -> &'static str {
        match self.kind {
            IndicatorKind::SlopeSignChange => "slopeSignChange",
            IndicatorKind::WillisonAmplitude => "willisonAmplitude",
        }
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let size = self.window_size;
        ensure_channels(&mut self.windows, channels, || {
            SlidingWindow::new(size, CounterPolicy::default())
        });
        ensure_channels(&mut self.hist, channels, || [None, None]);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx] as f64;
                let flag = self.indicator(&self.hist[c], x);
                self.hist[c][1] = self.hist[c][0];
                self.hist[c][0] = Some(x);
                samples[idx] = self.windows[c].add_sample(if flag { 1.0 } else { 0.0 });
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.hist.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("history");
        w.begin_array();
        for h in &self.hist {
            for slot in h {
                match slot {
                    Some(v) => w.write_f64(*v),
                    None => w.write_null(),
                }
            }
        }
        w.end_array();
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
        r.expect_field("history")?;
        r.expect_array_start()?;
        let mut slots = Vec::new();
        loop {
            match r.peek_tag()? {
                sf_state::Tag::ArrayEnd => break,
                sf_state::Tag::Null => {
                    r.read_tag()?;
                    slots.push(None);
                }
                _ => slots.push(Some(r.read_f64()?)),
            }
        }
        r.expect_array_end()?;
        if slots.len() % 2 != 0 {
            return Err(SfError::CorruptSnapshot(
                "indicator history must hold pairs".to_string(),
            ));
        }
        self.hist = slots.chunks(2).map(|c| [c[0], c[1]]).collect();
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(self.window_size, CounterPolicy::default());
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PEAK DETECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Local-maxima count over a sliding window.
pub struct PeakDetectionStage {
    window_size: usize,
    threshold: f64,
    min_distance: usize,
    windows: Vec<SlidingWindow<PeakDetectionPolicy>>,
}

impl PeakDetectionStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let window_size = params.usize("windowSize")?;
        if window_size < 3 {
            return Err(SfError::invalid(
                "parameter 'windowSize' must be at least 3 for peak detection",
            ));
        }
        Ok(Self {
            window_size,
            threshold: params.f64_or("threshold", 0.0)?,
            min_distance: params.usize_or("minPeakDistance", 1)?,
            windows: Vec::new(),
        })
    }
}

impl Stage for PeakDetectionStage {
    fn stage_type(&self) -> &'static str {
        "peakDetection"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let (size, threshold, dist) = (self.window_size, self.threshold, self.min_distance);
        ensure_channels(&mut self.windows, channels, || {
            SlidingWindow::new(size, PeakDetectionPolicy::new(threshold, dist))
        });
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                samples[idx] = self.windows[c].add_sample(samples[idx]);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
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
        r.expect_field("windows")?;
        r.expect_array_start()?;
        self.windows.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            let mut sw = SlidingWindow::new(
                self.window_size,
                PeakDetectionPolicy::new(self.threshold, self.min_distance),
            );
            read_window(r, &mut sw)?;
            self.windows.push(sw);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LINEAR REGRESSION
// ═══════════════════════════════════════════════════════════════════════════

/// Which regression quantity the stage emits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionOutput {
    Slope,
    Intercept,
    Residuals,
    Predictions,
}

impl RegressionOutput {
    pub fn stage_type(self) -> &'static str {
        match self {
            Self::Slope => "linearRegressionSlope",
            Self::Intercept => "linearRegressionIntercept",
            Self::Residuals => "linearRegressionResiduals",
            Self::Predictions => "linearRegressionPredictions",
        }
    }
}

/// Per-channel incremental least-squares over window-relative indices.
struct RegressionChannel {
    ring: RingBuffer,
    s1: f64,
    s2: f64,
}

impl RegressionChannel {
    fn new(size: usize) -> Self {
        Self {
            ring: RingBuffer::new(size),
            s1: 0.0,
            s2: 0.0,
        }
    }

    /// Slide the window by one and return (slope, intercept, count).
    fn push(&mut self, y: Sample) -> (f64, f64, usize) {
        let y = y as f64;
        if self.ring.is_full() {
            // remove the oldest (index 0), reindex the remainder down by one
            let oldest = self.ring.peek().unwrap_or(0.0) as f64;
            self.s2 = self.s2 - self.s1 + oldest;
            self.s1 -= oldest;
            let count = self.ring.len();
            self.s2 += (count - 1) as f64 * y;
            self.s1 += y;
        } else {
            self.s2 += self.ring.len() as f64 * y;
            self.s1 += y;
        }
        self.ring.push_overwrite(y as Sample);

        let n = self.ring.len();
        if n < 2 {
            return (0.0, self.s1 / n.max(1) as f64, n);
        }
        let nf = n as f64;
        let sx = nf * (nf - 1.0) / 2.0;
        let sxx = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
        let denom = nf * sxx - sx * sx;
        let slope = (nf * self.s2 - sx * self.s1) / denom;
        let intercept = (self.s1 - slope * sx) / nf;
        (slope, intercept, n)
    }
}

/// Sliding-window linear regression of sample value against window index.
pub struct LinearRegressionStage {
    output: RegressionOutput,
    window_size: usize,
    channels: Vec<RegressionChannel>,
}

impl LinearRegressionStage {
    pub fn from_params(output: RegressionOutput, params: &StageParams) -> SfResult<Self> {
        let window_size = params.usize("windowSize")?;
        if window_size < 2 {
            return Err(SfError::invalid(
                "parameter 'windowSize' must be at least 2 for regression",
            ));
        }
        Ok(Self {
            output,
            window_size,
            channels: Vec::new(),
        })
    }
}

impl Stage for LinearRegressionStage {
    fn stage_type(&self) -> &'static str {
        self.output.stage_type()
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let size = self.window_size;
        ensure_channels(&mut self.channels, channels, || RegressionChannel::new(size));
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let y = samples[idx];
                let (slope, intercept, n) = self.channels[c].push(y);
                let prediction = intercept + slope * (n - 1) as f64;
                samples[idx] = match self.output {
                    RegressionOutput::Slope => slope as Sample,
                    RegressionOutput::Intercept => intercept as Sample,
                    RegressionOutput::Predictions => prediction as Sample,
                    RegressionOutput::Residuals => (y as f64 - prediction) as Sample,
                };
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for ch in &self.channels {
            w.begin_object();
            w.field("window");
            w.write_f32_array(&ch.ring.to_vec());
            w.field("s1");
            w.write_f64(ch.s1);
            w.field("s2");
            w.write_f64(ch.s2);
            w.end_object();
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.channels.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            r.expect_object_start()?;
            r.expect_field("window")?;
            let window = r.read_f32_array()?;
            r.expect_field("s1")?;
            let s1 = r.read_f64()?;
            r.expect_field("s2")?;
            let s2 = r.read_f64()?;
            r.expect_object_end()?;
            let mut ch = RegressionChannel::new(self.window_size);
            ch.ring.fill_from(&window);
            ch.s1 = s1;
            ch.s2 = s2;
            self.channels.push(ch);
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
    fn waveform_length_sums_diffs() {
        let mut s = WaveformLengthStage::from_params(&params!({"windowSize": 3})).unwrap();
        let mut buf = vec![0.0, 1.0, -1.0, -1.0];
        s.process(&mut buf, 1, None).unwrap();
        // diffs: 0, 1, 2, 0 -> window sums: 0, 1, 3, 3
        assert_eq!(buf, vec![0.0, 1.0, 3.0, 3.0]);
    }

    #[test]
    fn wamp_counts_large_jumps() {
        let mut s = IndicatorCountStage::willison_amplitude(
            &params!({"windowSize": 4, "threshold": 0.5}),
        )
        .unwrap();
        let mut buf = vec![0.0, 1.0, 1.1, 0.0];
        s.process(&mut buf, 1, None).unwrap();
        // jumps: -, 1.0 (yes), 0.1 (no), 1.1 (yes)
        assert_eq!(buf[3], 2.0);
    }

    #[test]
    fn ssc_counts_direction_changes() {
        let mut s = IndicatorCountStage::slope_sign_change(
            &params!({"windowSize": 8, "threshold": 0.0}),
        )
        .unwrap();
        let mut buf = vec![0.0, 1.0, 0.0, 1.0, 0.0];
        s.process(&mut buf, 1, None).unwrap();
        // direction flips at samples 2, 3, 4
        assert_eq!(buf[4], 3.0);
    }

    #[test]
    fn regression_slope_of_ramp_is_one() {
        let mut s = LinearRegressionStage::from_params(
            RegressionOutput::Slope,
            &params!({"windowSize": 4}),
        )
        .unwrap();
        let mut buf: Vec<Sample> = (0..10).map(|i| i as Sample).collect();
        s.process(&mut buf, 1, None).unwrap();
        for &v in &buf[1..] {
            assert!((v - 1.0).abs() < 1e-5, "slope {v}");
        }
    }

    #[test]
    fn regression_residuals_of_line_are_zero() {
        let mut s = LinearRegressionStage::from_params(
            RegressionOutput::Residuals,
            &params!({"windowSize": 5}),
        )
        .unwrap();
        let mut buf: Vec<Sample> = (0..12).map(|i| 3.0 + 2.0 * i as Sample).collect();
        s.process(&mut buf, 1, None).unwrap();
        for &v in &buf {
            assert!(v.abs() < 1e-4, "residual {v}");
        }
    }

    #[test]
    fn regression_incremental_matches_direct() {
        let data: Vec<Sample> = (0..50)
            .map(|i| ((i * 29 % 13) as Sample) * 0.3 - 1.0)
            .collect();
        let size = 6;
        let mut s = LinearRegressionStage::from_params(
            RegressionOutput::Slope,
            &params!({"windowSize": 6}),
        )
        .unwrap();
        let mut buf = data.clone();
        s.process(&mut buf, 1, None).unwrap();

        for i in (size - 1)..data.len() {
            let win = &data[i + 1 - size..=i];
            let n = size as f64;
            let sx = n * (n - 1.0) / 2.0;
            let sxx = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
            let s1: f64 = win.iter().map(|&v| v as f64).sum();
            let s2: f64 = win
                .iter()
                .enumerate()
                .map(|(k, &v)| k as f64 * v as f64)
                .sum();
            let slope = (n * s2 - sx * s1) / (n * sxx - sx * sx);
            assert!((buf[i] as f64 - slope).abs() < 1e-4, "at {i}");
        }
    }

    #[test]
    fn peaks_counted_in_window() {
        let mut s = PeakDetectionStage::from_params(
            &params!({"windowSize": 8, "threshold": 0.5, "minPeakDistance": 2}),
        )
        .unwrap();
        let mut buf = vec![0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0];
        s.process(&mut buf, 1, None).unwrap();
        assert_eq!(buf[7], 2.0);
    }
}
