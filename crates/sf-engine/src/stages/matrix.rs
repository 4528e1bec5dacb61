//! Matrix-transform stages: pcaTransform, icaTransform, whiteningTransform,
//! cspTransform, plus the GSC preprocessor.
//!
//! The transform stages apply a precomputed projection (from the one-shot
//! analysis helpers in sf-dsp) per sample: `y = M (x - mean)`. They change
//! the channel count, so they run through the resizing path. The GSC
//! preprocessor keeps the channel count (fixed beamformer in channel 0,
//! blocking-matrix differences in the rest).

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::matrix::gsc_matrix;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::Stage;
use crate::StageParams;

/// Which analysis produced the projection; fixes the stage type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Pca,
    Ica,
    Whitening,
    Csp,
}

impl MatrixKind {
    pub fn stage_type(self) -> &'static str {
        match self {
            Self::Pca => "pcaTransform",
            Self::Ica => "icaTransform",
            Self::Whitening => "whiteningTransform",
            Self::Csp => "cspTransform",
        }
    }
}

/// Per-sample projection through a fixed matrix after mean removal.
pub struct MatrixTransformStage {
    kind: MatrixKind,
    /// Row-major `num_components x num_channels`
    matrix: Vec<Sample>,
    mean: Vec<Sample>,
    num_channels: usize,
    num_components: usize,
}

impl MatrixTransformStage {
    pub fn from_params(kind: MatrixKind, params: &StageParams) -> SfResult<Self> {
        let num_channels = params.usize("numChannels")?;
        let num_components = params.usize("numComponents")?;
        if num_channels == 0 || num_components == 0 {
            return Err(SfError::invalid(
                "'numChannels' and 'numComponents' must be positive",
            ));
        }
        let matrix = params.f32_array("matrix")?;
        if matrix.len() != num_components * num_channels {
            return Err(SfError::invalid(format!(
                "'matrix' length {} does not match {num_components} x {num_channels}",
                matrix.len()
            )));
        }
        let mean = match params.f32_array_opt("mean")? {
            Some(mean) => {
                if mean.len() != num_channels {
                    return Err(SfError::invalid(format!(
                        "'mean' length {} does not match {num_channels} channels",
                        mean.len()
                    )));
                }
                mean
            }
            None => vec![0.0; num_channels],
        };
        Ok(Self {
            kind,
            matrix,
            mean,
            num_channels,
            num_components,
        })
    }
}

impl Stage for MatrixTransformStage {
    fn stage_type(&self) -> &'static str {
        self.kind.stage_type()
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_channel_count(&self) -> usize {
        self.num_components
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
        if channels != self.num_channels {
            return Err(SfError::stage(
                self.stage_type(),
                format!(
                    "configured for {} channels but received {channels}",
                    self.num_channels
                ),
            ));
        }
        let frames = input.len() / channels;
        for i in 0..frames {
            let frame = &input[i * channels..(i + 1) * channels];
            for k in 0..self.num_components {
                let row = &self.matrix[k * channels..(k + 1) * channels];
                let mut acc = 0.0f64;
                for c in 0..channels {
                    acc += row[c] as f64 * (frame[c] as f64 - self.mean[c] as f64);
                }
                output.push(acc as Sample);
            }
        }
        Ok(frames * self.num_components)
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

/// Fixed delay-and-sum beamformer plus blocking matrix, channel count kept.
pub struct GscPreprocessorStage {
    num_channels: usize,
    matrix: Vec<Sample>,
    scratch: Vec<Sample>,
}

impl GscPreprocessorStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let num_channels = params.usize("numChannels")?;
        let matrix = gsc_matrix(num_channels)?;
        Ok(Self {
            num_channels,
            matrix,
            scratch: Vec::new(),
        })
    }
}

impl Stage for GscPreprocessorStage {
    fn stage_type(&self) -> &'static str {
        "gscPreprocessor"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        if channels != self.num_channels {
            return Err(SfError::stage(
                self.stage_type(),
                format!(
                    "configured for {} channels but received {channels}",
                    self.num_channels
                ),
            ));
        }
        let frames = samples.len() / channels;
        self.scratch.resize(channels, 0.0);
        for i in 0..frames {
            let frame = &samples[i * channels..(i + 1) * channels];
            for r in 0..channels {
                let row = &self.matrix[r * channels..(r + 1) * channels];
                let mut acc = 0.0f64;
                for c in 0..channels {
                    acc += row[c] as f64 * frame[c] as f64;
                }
                self.scratch[r] = acc as Sample;
            }
            samples[i * channels..(i + 1) * channels].copy_from_slice(&self.scratch);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn projection_reduces_channels() {
        // project 3 channels onto 1: the mean across channels
        let mut s = MatrixTransformStage::from_params(
            MatrixKind::Pca,
            &params!({
                "matrix": [0.3333333, 0.3333333, 0.3333333],
                "numChannels": 3,
                "numComponents": 1
            }),
        )
        .unwrap();
        let input = [3.0, 6.0, 9.0, 1.0, 1.0, 1.0];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 3, None).unwrap();
        assert_eq!(produced, 2);
        assert!((out[0] - 6.0).abs() < 1e-4);
        assert!((out[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn mean_is_removed_before_projection() {
        let mut s = MatrixTransformStage::from_params(
            MatrixKind::Whitening,
            &params!({
                "matrix": [1.0, 0.0],
                "mean": [5.0, 0.0],
                "numChannels": 2,
                "numComponents": 1
            }),
        )
        .unwrap();
        let input = [5.0, 99.0, 7.0, 99.0];
        let mut out = Vec::new();
        s.process_resizing(&input, &mut out, 2, None).unwrap();
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn channel_mismatch_is_stage_error() {
        let mut s = MatrixTransformStage::from_params(
            MatrixKind::Ica,
            &params!({"matrix": [1.0, 0.0], "numChannels": 2, "numComponents": 1}),
        )
        .unwrap();
        let mut out = Vec::new();
        assert!(s.process_resizing(&[1.0], &mut out, 1, None).is_err());
    }

    #[test]
    fn gsc_blocks_common_mode() {
        let mut s = GscPreprocessorStage::from_params(&params!({"numChannels": 3})).unwrap();
        // identical signal on all channels: beamformer passes it, blockers null it
        let mut buf = vec![2.0, 2.0, 2.0, -1.0, -1.0, -1.0];
        s.process(&mut buf, 3, None).unwrap();
        assert!((buf[0] - 2.0).abs() < 1e-6);
        assert!(buf[1].abs() < 1e-6);
        assert!(buf[2].abs() < 1e-6);
        assert!((buf[3] + 1.0).abs() < 1e-6);
    }
}
