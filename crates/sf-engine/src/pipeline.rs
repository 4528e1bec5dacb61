//! Pipeline executor
//!
//! Owns the ordered stage list and drives buffers through it: validation,
//! timestamp synthesis, in-place vs resizing dispatch, channel propagation,
//! timestamp reinterpolation, the shared busy lock and async offload, plus
//! snapshot save/load over the binary codec.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::simd;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::debug;
use crate::registry;
use crate::stage::Stage;
use crate::worker;
use crate::StageParams;

// ═══════════════════════════════════════════════════════════════════════════
// OPTIONS AND SUMMARIES
// ═══════════════════════════════════════════════════════════════════════════

/// Per-call options for `process`/`process_sync`.
///
/// `sample_rate` of 0 means "derive timestamps from the provided array, or
/// fall back to sample indices".
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub channels: usize,
    pub sample_rate: f64,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 0.0,
        }
    }
}

impl ProcessOptions {
    pub fn channels(channels: usize) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

/// One row of [`Pipeline::list_state`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageSummary {
    pub index: usize,
    pub stage_type: String,
    pub resizing: bool,
}

/// Summary record returned by [`Pipeline::list_state`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStateSummary {
    pub stage_count: usize,
    pub stages: Vec<StageSummary>,
}

// ═══════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

struct Shared {
    stages: Mutex<Vec<Box<dyn Stage>>>,
    /// Shared with in-flight workers so they can always clear it.
    busy: Arc<AtomicBool>,
    disposed: AtomicBool,
}

/// A linear chain of DSP stages with persistent per-stage state.
///
/// Single-writer: `add_stage`, `add_filter_stage`, `load_state`,
/// `clear_state`, `dispose` and the process calls are mutually exclusive;
/// attempts to enter one while another runs fail immediately with `Busy`.
pub struct Pipeline {
    shared: Arc<Shared>,
}

/// Clears the busy flag on every exit path, including panics on the worker.
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Join handle for an async `process` call.
pub struct ProcessHandle {
    rx: Receiver<SfResult<Vec<Sample>>>,
}

impl ProcessHandle {
    /// Block until the worker finishes and take the result.
    pub fn wait(self) -> SfResult<Vec<Sample>> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(SfError::NumericFailure(
                "worker terminated without a result".to_string(),
            )),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                stages: Mutex::new(Vec::new()),
                busy: Arc::new(AtomicBool::new(false)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn check_disposed(&self) -> SfResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(SfError::Disposed);
        }
        Ok(())
    }

    /// Take the busy flag or fail immediately (no blocking, no queueing).
    fn acquire_busy(&self) -> SfResult<BusyGuard> {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SfError::Busy);
        }
        Ok(BusyGuard {
            busy: Arc::clone(&self.shared.busy),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn stage_count(&self) -> usize {
        self.shared.stages.lock().len()
    }

    // ── chain construction ──────────────────────────────────────────────

    /// Append a stage by registry type name. The pipeline is unchanged on
    /// any failure.
    pub fn add_stage(&self, stage_type: &str, params: StageParams) -> SfResult<()> {
        self.check_disposed()?;
        let _guard = self.acquire_busy()?;
        let stage = registry::create_stage(stage_type, &params)?;
        self.shared.stages.lock().push(stage);
        Ok(())
    }

    /// Append a raw-coefficient IIR filter stage (`a == [1]` degenerates to
    /// FIR behavior).
    pub fn add_filter_stage(&self, b: &[f64], a: &[f64]) -> SfResult<()> {
        self.check_disposed()?;
        let _guard = self.acquire_busy()?;
        let stage = crate::stages::filters::filter_stage_from_coefficients(b, a)?;
        self.shared.stages.lock().push(stage);
        Ok(())
    }

    // ── processing ──────────────────────────────────────────────────────

    /// Synchronous processing on the caller's thread. The busy flag is
    /// released before returning.
    pub fn process_sync(
        &self,
        samples: &[Sample],
        timestamps: Option<&[TimestampMs]>,
        options: &ProcessOptions,
    ) -> SfResult<Vec<Sample>> {
        self.check_disposed()?;
        let guard = self.acquire_busy()?;
        let mut stages = self.shared.stages.lock();
        let result = run_chain(&mut stages, samples, timestamps, options);
        drop(stages);
        drop(guard);
        result
    }

    /// Async processing on a worker thread. The busy flag is taken before
    /// the worker is scheduled and released on the worker on completion or
    /// failure.
    pub fn process(
        &self,
        samples: &[Sample],
        timestamps: Option<&[TimestampMs]>,
        options: &ProcessOptions,
    ) -> SfResult<ProcessHandle> {
        self.check_disposed()?;
        let guard = self.acquire_busy()?;

        let shared = Arc::clone(&self.shared);
        let samples = samples.to_vec();
        let timestamps = timestamps.map(|t| t.to_vec());
        let options = *options;
        let (tx, rx) = bounded(1);

        worker::spawn(move || {
            let mut stages = shared.stages.lock();
            let result = run_chain(&mut stages, &samples, timestamps.as_deref(), &options);
            drop(stages);
            // clear the flag on this thread, success or failure, before the
            // caller can observe the result
            drop(guard);
            let _ = tx.send(result);
        });

        Ok(ProcessHandle { rx })
    }

    // ── state management ────────────────────────────────────────────────

    /// Serialize the whole pipeline state as a binary snapshot.
    pub fn save_state(&self) -> SfResult<Vec<u8>> {
        self.check_disposed()?;
        let stages = self.shared.stages.lock();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let mut w = SnapshotWriter::new();
        w.begin_object();
        w.field("timestamp");
        w.write_f64(timestamp);
        w.field("stageCount");
        w.write_i32(stages.len() as i32);
        w.field("stages");
        w.begin_array();
        for stage in stages.iter() {
            w.begin_object();
            w.field("type");
            w.write_string(stage.stage_type());
            w.field("state");
            stage.save_state(&mut w);
            w.end_object();
        }
        w.end_array();
        w.end_object();
        Ok(w.into_bytes())
    }

    /// Restore a snapshot into this pipeline.
    ///
    /// The layout (stage count and per-index types) is validated in full
    /// before any stage state is touched. State deserialization itself is
    /// in-place: if it fails midway, the pipeline state is undefined and the
    /// caller must treat the pipeline as to-be-rebuilt.
    pub fn load_state(&self, bytes: &[u8]) -> SfResult<bool> {
        self.check_disposed()?;
        let _guard = self.acquire_busy()?;
        let mut stages = self.shared.stages.lock();

        // pass 1: validate layout without touching state
        let mut r = SnapshotReader::new(bytes);
        let snapshot_types = read_layout(&mut r)?;
        if snapshot_types.len() != stages.len() {
            return Err(SfError::StageCountMismatch {
                snapshot: snapshot_types.len(),
                pipeline: stages.len(),
            });
        }
        for (index, (snap_type, stage)) in snapshot_types.iter().zip(stages.iter()).enumerate() {
            if snap_type != stage.stage_type() {
                return Err(SfError::StageTypeMismatch {
                    index,
                    snapshot: snap_type.clone(),
                    pipeline: stage.stage_type().to_string(),
                });
            }
        }

        // pass 2: deserialize in place
        r.rewind();
        r.expect_object_start()?;
        r.expect_field("timestamp")?;
        let _ = r.read_f64()?;
        r.expect_field("stageCount")?;
        let _ = r.read_i32()?;
        r.expect_field("stages")?;
        r.expect_array_start()?;
        for stage in stages.iter_mut() {
            r.expect_object_start()?;
            r.expect_field("type")?;
            let _ = r.read_string()?;
            r.expect_field("state")?;
            stage.load_state(&mut r)?;
            r.expect_object_end()?;
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(true)
    }

    /// Reset every stage's stream state (configuration is kept).
    pub fn clear_state(&self) -> SfResult<()> {
        self.check_disposed()?;
        let _guard = self.acquire_busy()?;
        for stage in self.shared.stages.lock().iter_mut() {
            stage.reset();
        }
        Ok(())
    }

    /// Summary of the current chain.
    pub fn list_state(&self) -> SfResult<PipelineStateSummary> {
        self.check_disposed()?;
        let stages = self.shared.stages.lock();
        Ok(PipelineStateSummary {
            stage_count: stages.len(),
            stages: stages
                .iter()
                .enumerate()
                .map(|(index, s)| StageSummary {
                    index,
                    stage_type: s.stage_type().to_string(),
                    resizing: s.is_resizing(),
                })
                .collect(),
        })
    }

    /// Dispose the pipeline, destroying its stages. Refuses while busy;
    /// idempotent afterwards.
    pub fn dispose(&self) -> SfResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.acquire_busy()?;
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.stages.lock().clear();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// THE CHAIN CORE
// ═══════════════════════════════════════════════════════════════════════════

/// Shared core of sync and async processing. Both paths synthesize
/// timestamps identically.
fn run_chain(
    stages: &mut [Box<dyn Stage>],
    input: &[Sample],
    timestamps: Option<&[TimestampMs]>,
    options: &ProcessOptions,
) -> SfResult<Vec<Sample>> {
    let channels = options.channels;
    if channels == 0 {
        return Err(SfError::invalid("channel count must be at least 1"));
    }
    if input.len() % channels != 0 {
        return Err(SfError::invalid(format!(
            "buffer length {} is not divisible by {} channels",
            input.len(),
            channels
        )));
    }
    if let Some(ts) = timestamps {
        if ts.len() != input.len() {
            return Err(SfError::invalid(format!(
                "timestamp length {} does not match buffer length {}",
                ts.len(),
                input.len()
            )));
        }
    }

    let mut current: Vec<Sample> = input.to_vec();
    let mut cur_channels = channels;
    let mut cur_ts: Vec<TimestampMs> = match timestamps {
        Some(ts) => ts.to_vec(),
        None => synthesize_timestamps(input.len(), channels, options.sample_rate),
    };

    if debug::executor_trace() {
        log::debug!(
            "process: {} values, {} channels, {} stages",
            input.len(),
            channels,
            stages.len()
        );
    }

    for (index, stage) in stages.iter_mut().enumerate() {
        if stage.is_resizing() {
            let in_samples = current.len() / cur_channels;
            let declared = stage.output_channel_count();
            let eff_channels = if declared == 0 { cur_channels } else { declared };
            let estimate = stage.output_sample_count(in_samples) * eff_channels;

            let mut out = Vec::with_capacity(estimate);
            let produced =
                stage.process_resizing(&current, &mut out, cur_channels, Some(&cur_ts))?;
            if produced != out.len() {
                return Err(SfError::stage(
                    stage.stage_type(),
                    format!(
                        "reported {produced} produced values but wrote {}",
                        out.len()
                    ),
                ));
            }
            if produced % eff_channels != 0 {
                return Err(SfError::stage(
                    stage.stage_type(),
                    format!("produced {produced} values across {eff_channels} channels"),
                ));
            }

            let out_samples = produced / eff_channels;
            let mut new_ts = vec![0.0 as TimestampMs; out_samples * eff_channels];
            simd::reinterp_timestamps(
                &cur_ts,
                cur_channels,
                &mut new_ts,
                eff_channels,
                stage.time_scale_factor(),
            );

            current = out;
            cur_channels = eff_channels;
            cur_ts = new_ts;
        } else {
            stage.process(&mut current, cur_channels, Some(&cur_ts))?;
        }

        if debug::executor_trace() {
            log::debug!(
                "stage {index} ({}) -> {} values, {} channels",
                stage.stage_type(),
                current.len(),
                cur_channels
            );
        }
        if debug::stage_dumps() {
            let head: Vec<Sample> = current.iter().take(8).copied().collect();
            log::debug!("stage {index} ({}) head: {head:?}", stage.stage_type());
        }
    }

    Ok(current)
}

/// `t_i = i * (1000 / sampleRate)` when a rate is supplied, else `t_i = i`.
fn synthesize_timestamps(len: usize, channels: usize, sample_rate: f64) -> Vec<TimestampMs> {
    let samples = len / channels;
    let interval = if sample_rate > 0.0 {
        1000.0 / sample_rate
    } else {
        1.0
    };
    let mut ts = vec![0.0 as TimestampMs; len];
    for i in 0..samples {
        let t = (i as f64 * interval) as TimestampMs;
        for c in 0..channels {
            ts[i * channels + c] = t;
        }
    }
    ts
}

/// Snapshot layout pass: header plus per-stage type tags, skipping state.
fn read_layout(r: &mut SnapshotReader) -> SfResult<Vec<String>> {
    r.expect_object_start()?;
    r.expect_field("timestamp")?;
    let _ = r.read_f64()?;
    r.expect_field("stageCount")?;
    let count = r.read_i32()?;
    if count < 0 {
        return Err(SfError::CorruptSnapshot(format!(
            "negative stage count {count}"
        )));
    }
    r.expect_field("stages")?;
    r.expect_array_start()?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        r.expect_object_start()?;
        r.expect_field("type")?;
        types.push(r.read_string()?);
        r.expect_field("state")?;
        r.skip_value()?;
        r.expect_object_end()?;
    }
    r.expect_array_end()?;
    r.expect_object_end()?;
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn empty_pipeline_is_identity() {
        let p = Pipeline::new();
        let out = p
            .process_sync(&[1.0, 2.0, 3.0], None, &ProcessOptions::default())
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn channel_mismatch_rejected() {
        let p = Pipeline::new();
        let err = p
            .process_sync(&[1.0, 2.0, 3.0], None, &ProcessOptions::channels(2))
            .unwrap_err();
        assert!(matches!(err, SfError::InvalidArgument(_)));
    }

    #[test]
    fn timestamp_length_mismatch_rejected() {
        let p = Pipeline::new();
        let err = p
            .process_sync(
                &[1.0, 2.0],
                Some(&[0.0]),
                &ProcessOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SfError::InvalidArgument(_)));
    }

    #[test]
    fn unknown_stage_rejected() {
        let p = Pipeline::new();
        let err = p.add_stage("definitelyNotAStage", params!({})).unwrap_err();
        assert!(matches!(err, SfError::UnknownStage(_)));
        assert_eq!(p.stage_count(), 0);
    }

    #[test]
    fn invalid_params_leave_pipeline_unchanged() {
        let p = Pipeline::new();
        assert!(p.add_stage("movingAverage", params!({})).is_err());
        assert_eq!(p.stage_count(), 0);
    }

    #[test]
    fn dispose_then_everything_fails() {
        let p = Pipeline::new();
        p.dispose().unwrap();
        assert!(matches!(
            p.add_stage("rectify", params!({"mode": "full"})),
            Err(SfError::Disposed)
        ));
        assert!(matches!(
            p.process_sync(&[1.0], None, &ProcessOptions::default()),
            Err(SfError::Disposed)
        ));
        assert!(matches!(p.save_state(), Err(SfError::Disposed)));
        assert!(matches!(p.clear_state(), Err(SfError::Disposed)));
        assert!(matches!(p.list_state(), Err(SfError::Disposed)));
        // idempotent
        assert!(p.dispose().is_ok());
    }

    #[test]
    fn busy_flag_excludes_mutation() {
        let p = Pipeline::new();
        let _guard = p.acquire_busy().unwrap();
        assert!(matches!(
            p.add_stage("rectify", params!({"mode": "full"})),
            Err(SfError::Busy)
        ));
        assert!(matches!(
            p.process_sync(&[1.0], None, &ProcessOptions::default()),
            Err(SfError::Busy)
        ));
        assert!(matches!(p.dispose(), Err(SfError::Busy)));
    }

    #[test]
    fn busy_clears_after_process() {
        let p = Pipeline::new();
        p.add_stage("rectify", params!({"mode": "full"})).unwrap();
        p.process_sync(&[-1.0, 2.0], None, &ProcessOptions::default())
            .unwrap();
        assert!(!p.is_busy());
        // add_stage succeeds after process resolves
        p.add_stage("square", params!({})).unwrap();
    }

    #[test]
    fn async_process_matches_sync() {
        let p = Pipeline::new();
        p.add_stage("amplify", params!({"gain": 2.0})).unwrap();
        let input = vec![1.0, -2.0, 3.0];
        let sync_out = p
            .process_sync(&input, None, &ProcessOptions::default())
            .unwrap();
        let handle = p.process(&input, None, &ProcessOptions::default()).unwrap();
        let async_out = handle.wait().unwrap();
        // amplify is stateless, so both runs agree
        assert_eq!(sync_out, async_out);
        assert!(!p.is_busy());
    }

    #[test]
    fn async_failure_clears_busy() {
        let p = Pipeline::new();
        let handle = p
            .process(&[1.0, 2.0, 3.0], None, &ProcessOptions::channels(2))
            .unwrap();
        assert!(handle.wait().is_err());
        assert!(!p.is_busy());
    }

    #[test]
    fn synthesized_timestamps_use_sample_rate() {
        let ts = synthesize_timestamps(6, 2, 1000.0);
        assert_eq!(ts, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        let ts = synthesize_timestamps(4, 1, 0.0);
        assert_eq!(ts, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn list_state_reports_chain() {
        let p = Pipeline::new();
        p.add_stage("rectify", params!({"mode": "half"})).unwrap();
        p.add_stage("decimate", params!({"factor": 2})).unwrap();
        let summary = p.list_state().unwrap();
        assert_eq!(summary.stage_count, 2);
        assert_eq!(summary.stages[0].stage_type, "rectify");
        assert!(!summary.stages[0].resizing);
        assert!(summary.stages[1].resizing);
    }
}
