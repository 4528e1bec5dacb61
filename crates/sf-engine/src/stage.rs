//! The stage contract and shared adapter plumbing

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::sliding::{SlidingWindow, WindowPolicy};
use sf_state::{SnapshotReader, SnapshotWriter};

/// One link in the pipeline chain.
///
/// Non-resizing stages process in place and must not change the sample or
/// channel count. Resizing stages write into a fresh allocation through
/// [`Stage::process_resizing`] and report what they actually produced; the
/// executor only uses [`Stage::output_sample_count`] to size the allocation.
///
/// A stage may finalize lazy configuration (window durations) on the first
/// buffer it sees; after that it must not change those parameters without a
/// [`Stage::reset`].
pub trait Stage: Send {
    /// Stable type tag, the same string the factory registry recognizes.
    fn stage_type(&self) -> &'static str;

    /// True iff the output sample count differs from the input.
    fn is_resizing(&self) -> bool {
        false
    }

    /// Allocation estimate for a resizing stage: output samples (per
    /// channel) for `input_samples` input samples.
    fn output_sample_count(&self, input_samples: usize) -> usize {
        input_samples
    }

    /// New channel count, or 0 when unchanged.
    fn output_channel_count(&self) -> usize {
        0
    }

    /// Input samples consumed per output sample (1.0 for non-resizing).
    fn time_scale_factor(&self) -> f64 {
        1.0
    }

    /// In-place processing for non-resizing stages.
    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()>;

    /// Resizing processing: append into `output`, return the produced length
    /// (total values, all channels interleaved).
    fn process_resizing(
        &mut self,
        _input: &[Sample],
        _output: &mut Vec<Sample>,
        _channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        Err(SfError::stage(self.stage_type(), "stage does not resize"))
    }

    /// Drop all retained stream state (not the configuration).
    fn reset(&mut self);

    /// Append this stage's state to a snapshot.
    fn save_state(&self, w: &mut SnapshotWriter);

    /// Restore state written by [`Stage::save_state`]. The stage must have
    /// been constructed with the same parameters.
    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// WINDOW SIZING
// ═══════════════════════════════════════════════════════════════════════════

/// Window sizing request: an explicit size, or a duration resolved once on
/// the first buffer from the average timestamp spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum WindowSpec {
    Size(usize),
    DurationMs(f64),
}

impl WindowSpec {
    /// Read `windowSize` / `windowDuration` from an option map.
    pub fn from_params(params: &crate::StageParams) -> SfResult<Self> {
        if let Some(size) = params.usize_opt("windowSize")? {
            if size == 0 {
                return Err(SfError::invalid("parameter 'windowSize' must be positive"));
            }
            return Ok(Self::Size(size));
        }
        if let Some(ms) = params.f64_opt("windowDuration")? {
            if ms <= 0.0 {
                return Err(SfError::invalid(
                    "parameter 'windowDuration' must be positive milliseconds",
                ));
            }
            return Ok(Self::DurationMs(ms));
        }
        Err(SfError::invalid(
            "one of 'windowSize' or 'windowDuration' is required",
        ))
    }

    /// Resolve to a concrete size. The duration conversion happens exactly
    /// once per stream: it uses the first buffer's average timestamp spacing
    /// regardless of how short that buffer is.
    pub fn resolve(
        &self,
        channels: usize,
        buffer_len: usize,
        timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<usize> {
        match *self {
            Self::Size(size) => Ok(size),
            Self::DurationMs(ms) => {
                let spacing = average_spacing_ms(channels, buffer_len, timestamps);
                let spacing = spacing.ok_or_else(|| {
                    SfError::invalid(
                        "'windowDuration' needs timestamps (or a sampleRate) to resolve",
                    )
                })?;
                Ok(((ms / spacing).round() as usize).max(1))
            }
        }
    }
}

/// Average per-sample timestamp spacing of an interleaved buffer.
pub(crate) fn average_spacing_ms(
    channels: usize,
    buffer_len: usize,
    timestamps: Option<&[TimestampMs]>,
) -> Option<f64> {
    let ts = timestamps?;
    let channels = channels.max(1);
    let samples = buffer_len / channels;
    if samples < 2 || ts.len() < buffer_len {
        return None;
    }
    let first = ts[0] as f64;
    let last = ts[(samples - 1) * channels] as f64;
    let spacing = (last - first) / (samples - 1) as f64;
    if spacing > 0.0 {
        Some(spacing)
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SNAPSHOT HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Serialize a sliding window as `{data, timestamps, policy}`.
pub(crate) fn write_window<P: WindowPolicy>(w: &mut SnapshotWriter, sw: &SlidingWindow<P>) {
    let (data, timestamps, policy) = sw.snapshot_state();
    w.begin_object();
    w.field("data");
    w.write_f32_array(&data);
    w.field("timestamps");
    if timestamps.is_empty() {
        w.write_null();
    } else {
        w.write_f32_array(&timestamps);
    }
    w.field("policy");
    w.begin_array();
    for v in policy {
        w.write_f64(v);
    }
    w.end_array();
    w.end_object();
}

/// Restore a sliding window written by [`write_window`].
pub(crate) fn read_window<P: WindowPolicy>(
    r: &mut SnapshotReader,
    sw: &mut SlidingWindow<P>,
) -> SfResult<()> {
    r.expect_object_start()?;
    r.expect_field("data")?;
    let data = r.read_f32_array()?;
    r.expect_field("timestamps")?;
    let timestamps = r.read_f32_array_or_null()?.unwrap_or_default();
    r.expect_field("policy")?;
    r.expect_array_start()?;
    let mut policy = Vec::new();
    while r.peek_tag()? == sf_state::Tag::Double {
        policy.push(r.read_f64()?);
    }
    r.expect_array_end()?;
    r.expect_object_end()?;
    sw.restore_state(&data, &timestamps, &policy)
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL PLUMBING
// ═══════════════════════════════════════════════════════════════════════════

/// Grow a per-channel state vector to `channels` entries using `make`.
pub(crate) fn ensure_channels<T>(states: &mut Vec<T>, channels: usize, mut make: impl FnMut() -> T) {
    while states.len() < channels {
        states.push(make());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_spec_prefers_size() {
        let p = crate::params!({"windowSize": 5, "windowDuration": 100.0});
        assert_eq!(WindowSpec::from_params(&p).unwrap(), WindowSpec::Size(5));
    }

    #[test]
    fn duration_resolves_from_spacing() {
        // 2 channels, 4 samples at 2 ms spacing
        let ts = [0.0, 0.0, 2.0, 2.0, 4.0, 4.0, 6.0, 6.0];
        let spec = WindowSpec::DurationMs(10.0);
        let size = spec.resolve(2, 8, Some(&ts)).unwrap();
        assert_eq!(size, 5);
    }

    #[test]
    fn duration_without_timestamps_fails() {
        let spec = WindowSpec::DurationMs(10.0);
        assert!(spec.resolve(1, 8, None).is_err());
    }
}
