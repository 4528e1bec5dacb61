//! Pointwise and short-memory stages: rectify, square, amplify,
//! differentiator, leaky integrator, clip detection.

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::simd;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, Stage};
use crate::StageParams;

// ═══════════════════════════════════════════════════════════════════════════
// RECTIFY / SQUARE / AMPLIFY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectifyMode {
    Half,
    Full,
}

/// Half- or full-wave rectification (SIMD maps).
pub struct RectifyStage {
    mode: RectifyMode,
}

impl RectifyStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let mode = match params.str_or("mode", "full")? {
            "half" => RectifyMode::Half,
            "full" => RectifyMode::Full,
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'mode' must be \"half\" or \"full\", got \"{other}\""
                )))
            }
        };
        Ok(Self { mode })
    }
}

impl Stage for RectifyStage {
    fn stage_type(&self) -> &'static str {
        "rectify"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        match self.mode {
            RectifyMode::Full => simd::abs_inplace(samples),
            RectifyMode::Half => simd::max_zero_inplace(samples),
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

/// `x^2`
pub struct SquareStage;

impl SquareStage {
    pub fn from_params(_params: &StageParams) -> SfResult<Self> {
        Ok(Self)
    }
}

impl Stage for SquareStage {
    fn stage_type(&self) -> &'static str {
        "square"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        for x in samples.iter_mut() {
            *x *= *x;
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

/// Constant linear gain.
pub struct AmplifyStage {
    gain: Sample,
}

impl AmplifyStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let gain = params.f64("gain")? as Sample;
        if !gain.is_finite() {
            return Err(SfError::invalid("parameter 'gain' must be finite"));
        }
        Ok(Self { gain })
    }
}

impl Stage for AmplifyStage {
    fn stage_type(&self) -> &'static str {
        "amplify"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        for x in samples.iter_mut() {
            *x *= self.gain;
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DIFFERENTIATOR / INTEGRATOR
// ═══════════════════════════════════════════════════════════════════════════

/// First difference per channel; the first sample of a stream differences
/// against zero.
pub struct DifferentiatorStage {
    prev: Vec<f64>,
}

impl DifferentiatorStage {
    pub fn from_params(_params: &StageParams) -> SfResult<Self> {
        Ok(Self { prev: Vec::new() })
    }
}

impl Stage for DifferentiatorStage {
    fn stage_type(&self) -> &'static str {
        "differentiator"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        ensure_channels(&mut self.prev, channels, || 0.0);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx] as f64;
                samples[idx] = (x - self.prev[c]) as Sample;
                self.prev[c] = x;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.prev.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("prev");
        let prev: Vec<Sample> = self.prev.iter().map(|&v| v as Sample).collect();
        w.write_f32_array(&prev);
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("prev")?;
        self.prev = r.read_f32_array()?.into_iter().map(|v| v as f64).collect();
        r.expect_object_end()?;
        Ok(())
    }
}

/// Leaky accumulator: `y = leak * y + x`.
pub struct IntegratorStage {
    leak: f64,
    acc: Vec<f64>,
}

impl IntegratorStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let leak = params.f64_or("leak", 0.995)?;
        if !(0.0..=1.0).contains(&leak) {
            return Err(SfError::invalid("parameter 'leak' must lie in [0, 1]"));
        }
        Ok(Self {
            leak,
            acc: Vec::new(),
        })
    }
}

impl Stage for IntegratorStage {
    fn stage_type(&self) -> &'static str {
        "integrator"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        ensure_channels(&mut self.acc, channels, || 0.0);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                self.acc[c] = self.leak * self.acc[c] + samples[idx] as f64;
                samples[idx] = self.acc[c] as Sample;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.acc.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("acc");
        let acc: Vec<Sample> = self.acc.iter().map(|&v| v as Sample).collect();
        w.write_f32_array(&acc);
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("acc")?;
        self.acc = r.read_f32_array()?.into_iter().map(|v| v as f64).collect();
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLIP DETECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Emits 1.0 where `|x| >= threshold`, else 0.0.
pub struct ClipDetectionStage {
    threshold: Sample,
}

impl ClipDetectionStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let threshold = params.f64_or("threshold", 1.0)? as Sample;
        if threshold <= 0.0 {
            return Err(SfError::invalid("parameter 'threshold' must be positive"));
        }
        Ok(Self { threshold })
    }
}

impl Stage for ClipDetectionStage {
    fn stage_type(&self) -> &'static str {
        "clipDetection"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        for x in samples.iter_mut() {
            *x = if x.abs() >= self.threshold { 1.0 } else { 0.0 };
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}
