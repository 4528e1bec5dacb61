//! Channel-shape stages: select, selector, merge.
//!
//! These change the channel count, so they run through the resizing path
//! even though the per-channel sample count is unchanged.

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::Stage;
use crate::StageParams;

/// Keep a single channel.
pub struct ChannelSelectStage {
    channel: usize,
}

impl ChannelSelectStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        Ok(Self {
            channel: params.usize("channel")?,
        })
    }
}

impl Stage for ChannelSelectStage {
    fn stage_type(&self) -> &'static str {
        "channelSelect"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_channel_count(&self) -> usize {
        1
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
        if self.channel >= channels {
            return Err(SfError::stage(
                self.stage_type(),
                format!("channel {} out of range ({channels} channels)", self.channel),
            ));
        }
        let frames = input.len() / channels;
        for i in 0..frames {
            output.push(input[i * channels + self.channel]);
        }
        Ok(frames)
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

/// Keep an ordered subset of channels.
pub struct ChannelSelectorStage {
    channels: Vec<usize>,
}

impl ChannelSelectorStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let channels = params
            .usize_array_opt("channels")?
            .ok_or_else(|| SfError::invalid("missing required parameter 'channels'"))?;
        if channels.is_empty() {
            return Err(SfError::invalid("parameter 'channels' must be non-empty"));
        }
        Ok(Self { channels })
    }
}

impl Stage for ChannelSelectorStage {
    fn stage_type(&self) -> &'static str {
        "channelSelector"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_channel_count(&self) -> usize {
        self.channels.len()
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
        if let Some(&bad) = self.channels.iter().find(|&&c| c >= channels) {
            return Err(SfError::stage(
                self.stage_type(),
                format!("channel {bad} out of range ({channels} channels)"),
            ));
        }
        let frames = input.len() / channels;
        for i in 0..frames {
            for &c in &self.channels {
                output.push(input[i * channels + c]);
            }
        }
        Ok(frames * self.channels.len())
    }

    fn reset(&mut self) {}

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_null();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.skip_value()
    }
}

/// Average all channels down to one.
pub struct ChannelMergeStage;

impl ChannelMergeStage {
    pub fn from_params(_params: &StageParams) -> SfResult<Self> {
        Ok(Self)
    }
}

impl Stage for ChannelMergeStage {
    fn stage_type(&self) -> &'static str {
        "channelMerge"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_channel_count(&self) -> usize {
        1
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
        let frames = input.len() / channels;
        for i in 0..frames {
            let mut acc = 0.0f64;
            for c in 0..channels {
                acc += input[i * channels + c] as f64;
            }
            output.push((acc / channels as f64) as Sample);
        }
        Ok(frames)
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
    fn select_keeps_one_channel() {
        let mut s = ChannelSelectStage::from_params(&params!({"channel": 1})).unwrap();
        let input = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 2, None).unwrap();
        assert_eq!(produced, 3);
        assert_eq!(out, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn select_out_of_range_fails() {
        let mut s = ChannelSelectStage::from_params(&params!({"channel": 2})).unwrap();
        let mut out = Vec::new();
        assert!(s.process_resizing(&[1.0, 2.0], &mut out, 2, None).is_err());
    }

    #[test]
    fn selector_reorders() {
        let mut s = ChannelSelectorStage::from_params(&params!({"channels": [2, 0]})).unwrap();
        let input = [1.0, 10.0, 100.0, 2.0, 20.0, 200.0];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 3, None).unwrap();
        assert_eq!(produced, 4);
        assert_eq!(out, vec![100.0, 1.0, 200.0, 2.0]);
    }

    #[test]
    fn merge_averages() {
        let mut s = ChannelMergeStage::from_params(&params!({})).unwrap();
        let input = [1.0, 3.0, 2.0, 4.0];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 2, None).unwrap();
        assert_eq!(produced, 2);
        assert_eq!(out, vec![2.0, 3.0]);
    }
}
