//! Adaptive stages: lmsFilter, rlsFilter, kalmanFilter
//!
//! The lms/rls adapters run one-step linear prediction: the regressor is the
//! previous `numTaps` samples, the desired signal is the current sample, and
//! the stage emits the prediction error (the whitened residual).

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::adaptive::{AdaptiveFir, RlsCore, ScalarKalman};
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, Stage};
use crate::StageParams;

// ═══════════════════════════════════════════════════════════════════════════
// LMS
// ═══════════════════════════════════════════════════════════════════════════

pub struct LmsFilterStage {
    prototype: AdaptiveFir,
    channels: Vec<AdaptiveFir>,
    prev: Vec<f64>,
}

impl LmsFilterStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let num_taps = params.usize("numTaps")?;
        let mu = match params.f64_opt("learningRate")? {
            Some(v) => v,
            None => params.f64_or("mu", 0.01)?,
        };
        let normalized = params.bool_or("normalized", false)?;
        let lambda = params.f64_or("lambda", 1e-6)?;
        Ok(Self {
            prototype: AdaptiveFir::new(num_taps, mu, normalized, lambda)?,
            channels: Vec::new(),
            prev: Vec::new(),
        })
    }
}

impl Stage for LmsFilterStage {
    fn stage_type(&self) -> &'static str {
        "lmsFilter"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let prototype = &self.prototype;
        ensure_channels(&mut self.channels, channels, || prototype.clone());
        ensure_channels(&mut self.prev, channels, || 0.0);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx];
                let (_, error) =
                    self.channels[c].process_sample(self.prev[c] as Sample, x, true);
                self.prev[c] = x as f64;
                samples[idx] = error;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.channels.clear();
        self.prev.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("prev");
        let prev: Vec<Sample> = self.prev.iter().map(|&v| v as Sample).collect();
        w.write_f32_array(&prev);
        w.field("channels");
        w.begin_array();
        for f in &self.channels {
            let (weights, delay) = f.snapshot_state();
            w.begin_object();
            w.field("weights");
            w.write_f32_array(&weights);
            w.field("delay");
            w.write_f32_array(&delay);
            w.end_object();
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("prev")?;
        self.prev = r.read_f32_array()?.into_iter().map(|v| v as f64).collect();
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.channels.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            r.expect_object_start()?;
            r.expect_field("weights")?;
            let weights = r.read_f32_array()?;
            r.expect_field("delay")?;
            let delay = r.read_f32_array()?;
            r.expect_object_end()?;
            let mut f = self.prototype.clone();
            f.reset();
            f.restore_state(&weights, &delay)?;
            self.channels.push(f);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RLS
// ═══════════════════════════════════════════════════════════════════════════

pub struct RlsFilterStage {
    prototype: RlsCore,
    channels: Vec<RlsCore>,
    prev: Vec<f64>,
}

impl RlsFilterStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let num_taps = params.usize("numTaps")?;
        let lambda = params.f64_or("lambda", 0.99)?;
        let delta = params.f64_or("delta", 0.01)?;
        Ok(Self {
            prototype: RlsCore::new(num_taps, lambda, delta)?,
            channels: Vec::new(),
            prev: Vec::new(),
        })
    }
}

impl Stage for RlsFilterStage {
    fn stage_type(&self) -> &'static str {
        "rlsFilter"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let prototype = &self.prototype;
        ensure_channels(&mut self.channels, channels, || prototype.clone());
        ensure_channels(&mut self.prev, channels, || 0.0);
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                let x = samples[idx];
                let (_, error) = self.channels[c].process_sample(self.prev[c] as Sample, x);
                self.prev[c] = x as f64;
                samples[idx] = error;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.channels.clear();
        self.prev.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("prev");
        let prev: Vec<Sample> = self.prev.iter().map(|&v| v as Sample).collect();
        w.write_f32_array(&prev);
        w.field("channels");
        w.begin_array();
        for f in &self.channels {
            let (weights, delay, p) = f.snapshot_state();
            w.begin_object();
            w.field("weights");
            w.write_f32_array(&weights);
            w.field("delay");
            w.write_f32_array(&delay);
            w.field("p");
            w.write_f32_array(&p);
            w.end_object();
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("prev")?;
        self.prev = r.read_f32_array()?.into_iter().map(|v| v as f64).collect();
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.channels.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            r.expect_object_start()?;
            r.expect_field("weights")?;
            let weights = r.read_f32_array()?;
            r.expect_field("delay")?;
            let delay = r.read_f32_array()?;
            r.expect_field("p")?;
            let p = r.read_f32_array()?;
            r.expect_object_end()?;
            let mut f = self.prototype.clone();
            f.reset();
            f.restore_state(&weights, &delay, &p)?;
            self.channels.push(f);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// KALMAN
// ═══════════════════════════════════════════════════════════════════════════

pub struct KalmanFilterStage {
    prototype: ScalarKalman,
    channels: Vec<ScalarKalman>,
}

impl KalmanFilterStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let q = params.f64_or("processNoise", 1e-5)?;
        let r = params.f64_or("measurementNoise", 1e-2)?;
        Ok(Self {
            prototype: ScalarKalman::new(q, r)?,
            channels: Vec::new(),
        })
    }
}

impl Stage for KalmanFilterStage {
    fn stage_type(&self) -> &'static str {
        "kalmanFilter"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let prototype = &self.prototype;
        ensure_channels(&mut self.channels, channels, || prototype.clone());
        let frames = samples.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let idx = i * channels + c;
                samples[idx] = self.channels[c].process_sample(samples[idx]);
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
        for k in &self.channels {
            for v in k.snapshot_state() {
                w.write_f64(v);
            }
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.channels.clear();
        let mut values = Vec::new();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            values.push(r.read_f64()?);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        if values.len() % 3 != 0 {
            return Err(SfError::CorruptSnapshot(
                "kalman state must hold triples".to_string(),
            ));
        }
        for chunk in values.chunks(3) {
            let mut k = self.prototype.clone();
            k.reset();
            k.restore_state(chunk)?;
            self.channels.push(k);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn lms_error_shrinks_on_predictable_signal() {
        let mut s = LmsFilterStage::from_params(
            &params!({"numTaps": 4, "learningRate": 0.5, "normalized": true}),
        )
        .unwrap();
        // strongly predictable: a slow sine
        let mut buf: Vec<Sample> = (0..2000).map(|i| ((i as f32) * 0.05).sin()).collect();
        s.process(&mut buf, 1, None).unwrap();
        let head: f64 = buf[..100].iter().map(|&e| (e as f64).abs()).sum::<f64>() / 100.0;
        let tail: f64 = buf[1900..].iter().map(|&e| (e as f64).abs()).sum::<f64>() / 100.0;
        assert!(tail < head * 0.5, "head {head}, tail {tail}");
    }

    #[test]
    fn kalman_tracks_constant() {
        let mut s = KalmanFilterStage::from_params(
            &params!({"processNoise": 1e-6, "measurementNoise": 0.01}),
        )
        .unwrap();
        let mut buf = vec![1.0; 500];
        s.process(&mut buf, 1, None).unwrap();
        assert!((buf[499] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn rls_stage_runs_per_channel() {
        let mut s = RlsFilterStage::from_params(&params!({"numTaps": 2})).unwrap();
        let mut buf: Vec<Sample> = (0..40)
            .flat_map(|i| {
                let t = i as f32 * 0.2;
                [t.sin(), t.cos()]
            })
            .collect();
        s.process(&mut buf, 2, None).unwrap();
        assert!(buf.iter().all(|v| v.is_finite()));
        assert_eq!(s.channels.len(), 2);
    }
}
