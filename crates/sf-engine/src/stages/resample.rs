//! Rate-changing stages: interpolate, decimate, resample.
//!
//! Each holds one polyphase core per channel and goes through the resizing
//! path. Output counts are exact for the interpolator; the decimator and
//! rational resampler may drift by one sample at a streaming boundary, which
//! the executor absorbs.

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::resample::{Decimator, Interpolator, Resampler, DEFAULT_ORDER};
use sf_dsp::simd;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::Stage;
use crate::StageParams;

/// Shared driver: per-channel extract, run, interleave.
fn run_per_channel<C>(
    input: &[Sample],
    output: &mut Vec<Sample>,
    channels: usize,
    stage_type: &'static str,
    cores: &mut [C],
    mut run: impl FnMut(&mut C, &[Sample], &mut Vec<Sample>),
) -> SfResult<usize> {
    let frames = input.len() / channels;
    let mut scratch = vec![0.0 as Sample; frames];
    let mut per_channel: Vec<Vec<Sample>> = Vec::with_capacity(channels);
    for (c, core) in cores.iter_mut().enumerate() {
        simd::extract_channel(input, channels, c, &mut scratch);
        let mut out = Vec::new();
        run(core, &scratch[..frames], &mut out);
        per_channel.push(out);
    }
    let len = per_channel.first().map(|v| v.len()).unwrap_or(0);
    if per_channel.iter().any(|v| v.len() != len) {
        return Err(SfError::stage(
            stage_type,
            "channels produced unequal sample counts",
        ));
    }
    for i in 0..len {
        for ch in &per_channel {
            output.push(ch[i]);
        }
    }
    Ok(len * channels)
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERPOLATE
// ═══════════════════════════════════════════════════════════════════════════

/// Upsample by an integer factor.
pub struct InterpolateStage {
    factor: usize,
    order: usize,
    channels: Vec<Interpolator>,
}

impl InterpolateStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let factor = params.usize("factor")?;
        let order = params.usize_or("order", DEFAULT_ORDER)?;
        // construct one to validate the parameters up front
        Interpolator::new(factor, order)?;
        Ok(Self {
            factor,
            order,
            channels: Vec::new(),
        })
    }

    fn ensure(&mut self, channels: usize) -> SfResult<()> {
        while self.channels.len() < channels {
            self.channels.push(Interpolator::new(self.factor, self.order)?);
        }
        Ok(())
    }
}

impl Stage for InterpolateStage {
    fn stage_type(&self) -> &'static str {
        "interpolate"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        input_samples * self.factor
    }

    fn time_scale_factor(&self) -> f64 {
        1.0 / self.factor as f64
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
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        self.ensure(channels)?;
        run_per_channel(
            input,
            output,
            channels,
            self.stage_type(),
            &mut self.channels,
            |core, input, out| core.process(input, out),
        )
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for core in &self.channels {
            w.write_f32_array(&core.snapshot_state());
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
            let state = r.read_f32_array()?;
            let mut core = Interpolator::new(self.factor, self.order)
                .map_err(|e| SfError::CorruptSnapshot(e.to_string()))?;
            core.restore_state(&state)?;
            self.channels.push(core);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DECIMATE
// ═══════════════════════════════════════════════════════════════════════════

/// Downsample by an integer factor.
pub struct DecimateStage {
    factor: usize,
    order: usize,
    channels: Vec<Decimator>,
}

impl DecimateStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let factor = params.usize("factor")?;
        let order = params.usize_or("order", DEFAULT_ORDER)?;
        Decimator::new(factor, order)?;
        Ok(Self {
            factor,
            order,
            channels: Vec::new(),
        })
    }

    fn ensure(&mut self, channels: usize) -> SfResult<()> {
        while self.channels.len() < channels {
            self.channels.push(Decimator::new(self.factor, self.order)?);
        }
        Ok(())
    }
}

impl Stage for DecimateStage {
    fn stage_type(&self) -> &'static str {
        "decimate"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        input_samples / self.factor + 1
    }

    fn time_scale_factor(&self) -> f64 {
        self.factor as f64
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
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        self.ensure(channels)?;
        run_per_channel(
            input,
            output,
            channels,
            self.stage_type(),
            &mut self.channels,
            |core, input, out| core.process(input, out),
        )
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for core in &self.channels {
            let (delay, phase) = core.snapshot_state();
            w.begin_object();
            w.field("delay");
            w.write_f32_array(&delay);
            w.field("phase");
            w.write_i32(phase as i32);
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
            r.expect_field("delay")?;
            let delay = r.read_f32_array()?;
            r.expect_field("phase")?;
            let phase = r.read_i32()?;
            r.expect_object_end()?;
            let mut core = Decimator::new(self.factor, self.order)
                .map_err(|e| SfError::CorruptSnapshot(e.to_string()))?;
            core.restore_state(&delay, phase.max(0) as usize)?;
            self.channels.push(core);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RESAMPLE
// ═══════════════════════════════════════════════════════════════════════════

/// Rational L/M rate conversion.
pub struct ResampleStage {
    up: usize,
    down: usize,
    order: usize,
    channels: Vec<Resampler>,
}

impl ResampleStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let up = params.usize("upFactor")?;
        let down = params.usize("downFactor")?;
        let order = params.usize_or("order", DEFAULT_ORDER)?;
        Resampler::new(up, down, order)?;
        Ok(Self {
            up,
            down,
            order,
            channels: Vec::new(),
        })
    }

    fn ensure(&mut self, channels: usize) -> SfResult<()> {
        while self.channels.len() < channels {
            self.channels
                .push(Resampler::new(self.up, self.down, self.order)?);
        }
        Ok(())
    }
}

impl Stage for ResampleStage {
    fn stage_type(&self) -> &'static str {
        "resample"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        input_samples * self.up / self.down + 1
    }

    fn time_scale_factor(&self) -> f64 {
        self.down as f64 / self.up as f64
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
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        self.ensure(channels)?;
        run_per_channel(
            input,
            output,
            channels,
            self.stage_type(),
            &mut self.channels,
            |core, input, out| core.process(input, out),
        )
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for core in &self.channels {
            let (history, phase) = core.snapshot_state();
            w.begin_object();
            w.field("history");
            w.write_f32_array(&history);
            w.field("phase");
            w.write_i32(phase as i32);
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
            r.expect_field("history")?;
            let history = r.read_f32_array()?;
            r.expect_field("phase")?;
            let phase = r.read_i32()?;
            r.expect_object_end()?;
            let mut core = Resampler::new(self.up, self.down, self.order)
                .map_err(|e| SfError::CorruptSnapshot(e.to_string()))?;
            core.restore_state(&history, phase.max(0) as usize)?;
            self.channels.push(core);
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
    fn interpolate_triples_length() {
        let mut s = InterpolateStage::from_params(&params!({"factor": 3})).unwrap();
        let input = vec![1.0; 100];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        assert_eq!(produced, 300);
    }

    #[test]
    fn resample_two_channels_stay_aligned() {
        let mut s =
            ResampleStage::from_params(&params!({"upFactor": 3, "downFactor": 2})).unwrap();
        // constant left channel, ramp right channel
        let mut input = Vec::with_capacity(600);
        for i in 0..300 {
            input.push(1.0);
            input.push(i as Sample);
        }
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 2, None).unwrap();
        assert_eq!(produced, 900);
        // after the transient the constant channel stays 1
        for i in 60..450 {
            assert!((out[2 * i] - 1.0).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn decimate_factor_validated() {
        assert!(DecimateStage::from_params(&params!({"factor": 0})).is_err());
        assert!(DecimateStage::from_params(&params!({"factor": 1})).is_err());
    }
}
