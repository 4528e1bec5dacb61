//! Spectral stages: fft, stft, hilbertEnvelope, melSpectrogram, mfcc,
//! waveletTransform.
//!
//! The frame-producing stages (fft, stft, mel, mfcc) are resizing: they
//! consume samples into per-channel accumulators and emit one frame of
//! values every time a full window (or hop) is available. Frames from all
//! channels stay aligned because every channel shares one configuration.

use num_complex::Complex;
use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::fft::{self, FftEngine};
use sf_dsp::mel;
use sf_dsp::moving_fft::{FftMode, MovingFft};
use sf_dsp::simd;
use sf_dsp::wavelet::{dwt_single, WaveletFilter, WaveletKind};
use sf_dsp::window::WindowKind;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, Stage};
use crate::StageParams;

/// What a spectrum frame is reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumOutput {
    Magnitude,
    Power,
    Phase,
    Db,
    Complex,
}

impl SpectrumOutput {
    fn from_params(params: &StageParams, default: &str) -> SfResult<Self> {
        match params.str_or("output", default)? {
            "magnitude" => Ok(Self::Magnitude),
            "power" => Ok(Self::Power),
            "phase" => Ok(Self::Phase),
            "db" => Ok(Self::Db),
            "complex" => Ok(Self::Complex),
            other => Err(SfError::invalid(format!(
                "parameter 'output' has unknown value \"{other}\""
            ))),
        }
    }

    fn values_per_bin(self) -> usize {
        match self {
            Self::Complex => 2,
            _ => 1,
        }
    }

    /// Reduce a spectrum into `out` (sized bins * values_per_bin).
    fn reduce(self, spec: &[Complex<Sample>], out: &mut [Sample]) {
        match self {
            Self::Magnitude => fft::magnitude(spec, out),
            Self::Power => fft::power(spec, out),
            Self::Phase => fft::phase(spec, out),
            Self::Db => {
                fft::magnitude(spec, out);
                for v in out.iter_mut() {
                    *v = 20.0 * v.max(1e-10).log10();
                }
            }
            Self::Complex => {
                for (i, c) in spec.iter().enumerate() {
                    out[2 * i] = c.re;
                    out[2 * i + 1] = c.im;
                }
            }
        }
    }
}

/// Interleave per-channel frame streams back into the wire layout.
fn interleave_emissions(
    stage_type: &'static str,
    per_channel: &[Vec<Sample>],
    output: &mut Vec<Sample>,
) -> SfResult<usize> {
    let channels = per_channel.len();
    let len = per_channel.first().map(|v| v.len()).unwrap_or(0);
    if per_channel.iter().any(|v| v.len() != len) {
        return Err(SfError::stage(
            stage_type,
            "channels emitted unequal frame counts",
        ));
    }
    for i in 0..len {
        for ch in per_channel {
            output.push(ch[i]);
        }
    }
    Ok(len * channels)
}

// ═══════════════════════════════════════════════════════════════════════════
// FFT STAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Block FFT: consumes `size` samples per channel (2*size values for
/// complex input) and emits one reduced spectrum per block.
pub struct FftStage {
    size: usize,
    complex_input: bool,
    forward: bool,
    output: SpectrumOutput,
    engine: FftEngine,
    buffers: Vec<Vec<Sample>>,
}

impl FftStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let size = params.usize("size")?;
        if size == 0 {
            return Err(SfError::invalid("parameter 'size' must be positive"));
        }
        let complex_input = match params.str_or("type", "real")? {
            "real" => false,
            "complex" => true,
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'type' must be \"real\" or \"complex\", got \"{other}\""
                )))
            }
        };
        let forward = params.bool_or("forward", true)?;
        if !forward && !complex_input {
            return Err(SfError::invalid(
                "inverse transforms need 'type': \"complex\" input",
            ));
        }
        let output = SpectrumOutput::from_params(params, "magnitude")?;
        Ok(Self {
            size,
            complex_input,
            forward,
            output,
            engine: FftEngine::new(size)?,
            buffers: Vec::new(),
        })
    }

    /// Input values consumed per emitted block, per channel.
    fn block_input(&self) -> usize {
        if self.complex_input {
            2 * self.size
        } else {
            self.size
        }
    }

    /// Values emitted per block, per channel.
    fn block_output(&self) -> usize {
        let bins = if self.complex_input {
            self.size
        } else {
            self.engine.real_bins()
        };
        bins * self.output.values_per_bin()
    }

    fn emit_block(&self, block: &[Sample], out: &mut Vec<Sample>) -> SfResult<()> {
        let mut spec = vec![Complex::new(0.0, 0.0); if self.complex_input {
            self.size
        } else {
            self.engine.real_bins()
        }];
        if self.complex_input {
            let input: Vec<Complex<Sample>> = block
                .chunks_exact(2)
                .map(|p| Complex::new(p[0], p[1]))
                .collect();
            if self.forward {
                self.engine.fft(&input, &mut spec)?;
            } else {
                self.engine.ifft(&input, &mut spec)?;
            }
        } else {
            self.engine.rfft(block, &mut spec)?;
        }
        let mut reduced = vec![0.0; self.block_output()];
        self.output.reduce(&spec, &mut reduced);
        out.extend_from_slice(&reduced);
        Ok(())
    }
}

impl Stage for FftStage {
    fn stage_type(&self) -> &'static str {
        "fft"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        (input_samples / self.block_input() + 1) * self.block_output()
    }

    fn time_scale_factor(&self) -> f64 {
        self.block_input() as f64 / self.block_output() as f64
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
        ensure_channels(&mut self.buffers, channels, Vec::new);
        let frames = input.len() / channels;
        let block = self.block_input();
        let mut emissions: Vec<Vec<Sample>> = vec![Vec::new(); channels];
        for (c, emitted) in emissions.iter_mut().enumerate() {
            // split borrow: accumulate into a local, not through &mut self
            let mut buffer = std::mem::take(&mut self.buffers[c]);
            for i in 0..frames {
                buffer.push(input[i * channels + c]);
                if buffer.len() == block {
                    self.emit_block(&buffer, emitted)?;
                    buffer.clear();
                }
            }
            self.buffers[c] = buffer;
        }
        interleave_emissions(self.stage_type(), &emissions, output)
    }

    fn reset(&mut self) {
        self.buffers.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("buffers");
        w.begin_array();
        for b in &self.buffers {
            w.write_f32_array(b);
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("buffers")?;
        r.expect_array_start()?;
        self.buffers.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            self.buffers.push(r.read_f32_array()?);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STFT STAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Short-time Fourier transform: overlapping windowed frames every `hop`
/// samples, reduced per [`SpectrumOutput`].
pub struct StftStage {
    window_size: usize,
    hop: usize,
    window: WindowKind,
    output: SpectrumOutput,
    channels: Vec<MovingFft>,
}

impl StftStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let window_size = params.usize("windowSize")?;
        if window_size == 0 {
            return Err(SfError::invalid("parameter 'windowSize' must be positive"));
        }
        let hop = params.usize_or("hopSize", (window_size / 2).max(1))?;
        if hop == 0 || hop > window_size {
            return Err(SfError::invalid(format!(
                "parameter 'hopSize' must lie in 1..={window_size}"
            )));
        }
        let window = params
            .str_opt("window")?
            .map(|name| {
                WindowKind::from_name(name).ok_or_else(|| {
                    SfError::invalid(format!("parameter 'window' has unknown value \"{name}\""))
                })
            })
            .transpose()?
            .unwrap_or(WindowKind::Hann);
        let output = SpectrumOutput::from_params(params, "magnitude")?;
        Ok(Self {
            window_size,
            hop,
            window,
            output,
            channels: Vec::new(),
        })
    }

    fn bins(&self) -> usize {
        self.window_size / 2 + 1
    }

    fn frame_values(&self) -> usize {
        self.bins() * self.output.values_per_bin()
    }

    fn make_fft(&self) -> SfResult<MovingFft> {
        MovingFft::new(self.window_size, self.hop, self.window, FftMode::Moving)
    }
}

impl Stage for StftStage {
    fn stage_type(&self) -> &'static str {
        "stft"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        (input_samples / self.hop + 1) * self.frame_values()
    }

    fn time_scale_factor(&self) -> f64 {
        self.hop as f64 / self.frame_values() as f64
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
        while self.channels.len() < channels {
            self.channels.push(self.make_fft()?);
        }
        let frames = input.len() / channels;
        let values = self.frame_values();
        let mut emissions: Vec<Vec<Sample>> = vec![Vec::new(); channels];
        for (c, emitted) in emissions.iter_mut().enumerate() {
            for i in 0..frames {
                if let Some(spec) = self.channels[c].add_sample(input[i * channels + c])? {
                    let mut reduced = vec![0.0; values];
                    self.output.reduce(&spec, &mut reduced);
                    emitted.extend_from_slice(&reduced);
                }
            }
        }
        interleave_emissions(self.stage_type(), &emissions, output)
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for mf in &self.channels {
            let (ring, pending) = mf.snapshot_state();
            w.begin_object();
            w.field("ring");
            w.write_f32_array(&ring);
            w.field("pending");
            w.write_i32(pending as i32);
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
            r.expect_field("ring")?;
            let ring = r.read_f32_array()?;
            r.expect_field("pending")?;
            let pending = r.read_i32()?;
            r.expect_object_end()?;
            let mut mf = self
                .make_fft()
                .map_err(|e| SfError::CorruptSnapshot(e.to_string()))?;
            mf.restore_state(&ring, pending.max(0) as usize);
            self.channels.push(mf);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HILBERT ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════

/// Analytic-signal envelope of each call's buffer (blockwise, per channel).
pub struct HilbertEnvelopeStage {
    engine: Option<FftEngine>,
}

impl HilbertEnvelopeStage {
    pub fn from_params(_params: &StageParams) -> SfResult<Self> {
        Ok(Self { engine: None })
    }

    fn engine_for(&mut self, n: usize) -> SfResult<&FftEngine> {
        let size = n.next_power_of_two().max(2);
        let needs_new = self.engine.as_ref().map(|e| e.size()) != Some(size);
        if needs_new {
            self.engine = Some(FftEngine::new(size)?);
        }
        Ok(self.engine.as_ref().expect("engine just built"))
    }
}

impl Stage for HilbertEnvelopeStage {
    fn stage_type(&self) -> &'static str {
        "hilbertEnvelope"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let frames = samples.len() / channels;
        if frames == 0 {
            return Ok(());
        }
        let engine = self.engine_for(frames)?;
        let size = engine.size();

        let mut padded = vec![Complex::new(0.0 as Sample, 0.0); size];
        let mut spec = vec![Complex::new(0.0 as Sample, 0.0); size];
        let mut analytic = vec![Complex::new(0.0 as Sample, 0.0); size];
        let mut scratch = vec![0.0 as Sample; frames];

        for c in 0..channels {
            simd::extract_channel(samples, channels, c, &mut scratch);
            for (i, p) in padded.iter_mut().enumerate() {
                *p = if i < frames {
                    Complex::new(scratch[i], 0.0)
                } else {
                    Complex::new(0.0, 0.0)
                };
            }
            engine.fft(&padded, &mut spec)?;
            // analytic mask: keep DC and Nyquist, double positives, zero negatives
            for (k, s) in spec.iter_mut().enumerate() {
                if k == 0 || k == size / 2 {
                    // unchanged
                } else if k < size / 2 {
                    *s = *s * 2.0;
                } else {
                    *s = Complex::new(0.0, 0.0);
                }
            }
            engine.ifft(&spec, &mut analytic)?;
            for i in 0..frames {
                samples[i * channels + c] = analytic[i].norm();
            }
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
// MEL SPECTROGRAM / MFCC
// ═══════════════════════════════════════════════════════════════════════════

/// Shared mel-frame machinery.
struct MelFrontend {
    window_size: usize,
    hop: usize,
    num_bins: usize,
    num_bands: usize,
    /// Row-major `num_bands x num_bins`
    filterbank: Vec<Sample>,
    channels: Vec<MovingFft>,
}

impl MelFrontend {
    fn from_params(params: &StageParams) -> SfResult<Self> {
        let num_bins = params.usize("numBins")?;
        if num_bins < 2 {
            return Err(SfError::invalid("parameter 'numBins' must be at least 2"));
        }
        let num_bands = params.usize("numMelBands")?;
        if num_bands == 0 {
            return Err(SfError::invalid("parameter 'numMelBands' must be positive"));
        }
        let window_size = params.usize_or("windowSize", (num_bins - 1) * 2)?;
        if window_size / 2 + 1 != num_bins {
            return Err(SfError::invalid(format!(
                "'numBins' {num_bins} does not match windowSize {window_size} (expect windowSize/2+1)"
            )));
        }
        let hop = params.usize_or("hopSize", (window_size / 2).max(1))?;
        if hop == 0 || hop > window_size {
            return Err(SfError::invalid(format!(
                "parameter 'hopSize' must lie in 1..={window_size}"
            )));
        }
        let filterbank = match params.f32_array_opt("filterbankMatrix")? {
            Some(matrix) => {
                if matrix.len() != num_bands * num_bins {
                    return Err(SfError::invalid(format!(
                        "'filterbankMatrix' length {} does not match {num_bands} x {num_bins}",
                        matrix.len()
                    )));
                }
                matrix
            }
            None => {
                let sample_rate = params.f64("sampleRate")?;
                mel::mel_filterbank(num_bands, num_bins, sample_rate)?
            }
        };
        Ok(Self {
            window_size,
            hop,
            num_bins,
            num_bands,
            filterbank,
            channels: Vec::new(),
        })
    }

    fn make_fft(&self) -> SfResult<MovingFft> {
        MovingFft::new(self.window_size, self.hop, WindowKind::Hann, FftMode::Moving)
    }

    /// Drive one channel, producing mel-energy frames.
    fn mel_frames(
        &mut self,
        channel: usize,
        input: &[Sample],
        channels: usize,
        frames: usize,
    ) -> SfResult<Vec<Vec<Sample>>> {
        let mut out = Vec::new();
        let mut power = vec![0.0 as Sample; self.num_bins];
        for i in 0..frames {
            if let Some(spec) = self.channels[channel].add_sample(input[i * channels + channel])? {
                fft::power(&spec, &mut power);
                let mut energies = vec![0.0 as Sample; self.num_bands];
                for (b, e) in energies.iter_mut().enumerate() {
                    let row = &self.filterbank[b * self.num_bins..(b + 1) * self.num_bins];
                    *e = simd::dot_product(row, &power) as Sample;
                }
                out.push(energies);
            }
        }
        Ok(out)
    }

    fn write_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("channels");
        w.begin_array();
        for mf in &self.channels {
            let (ring, pending) = mf.snapshot_state();
            w.begin_object();
            w.field("ring");
            w.write_f32_array(&ring);
            w.field("pending");
            w.write_i32(pending as i32);
            w.end_object();
        }
        w.end_array();
        w.end_object();
    }

    fn read_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("channels")?;
        r.expect_array_start()?;
        self.channels.clear();
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            r.expect_object_start()?;
            r.expect_field("ring")?;
            let ring = r.read_f32_array()?;
            r.expect_field("pending")?;
            let pending = r.read_i32()?;
            r.expect_object_end()?;
            let mut mf = self
                .make_fft()
                .map_err(|e| SfError::CorruptSnapshot(e.to_string()))?;
            mf.restore_state(&ring, pending.max(0) as usize);
            self.channels.push(mf);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

/// Mel-band energies per analysis frame.
pub struct MelSpectrogramStage {
    frontend: MelFrontend,
}

impl MelSpectrogramStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        Ok(Self {
            frontend: MelFrontend::from_params(params)?,
        })
    }
}

impl Stage for MelSpectrogramStage {
    fn stage_type(&self) -> &'static str {
        "melSpectrogram"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        (input_samples / self.frontend.hop + 1) * self.frontend.num_bands
    }

    fn time_scale_factor(&self) -> f64 {
        self.frontend.hop as f64 / self.frontend.num_bands as f64
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
        while self.frontend.channels.len() < channels {
            let mf = self.frontend.make_fft()?;
            self.frontend.channels.push(mf);
        }
        let frames = input.len() / channels;
        let mut emissions: Vec<Vec<Sample>> = Vec::with_capacity(channels);
        for c in 0..channels {
            let mel_frames = self.frontend.mel_frames(c, input, channels, frames)?;
            emissions.push(mel_frames.into_iter().flatten().collect());
        }
        interleave_emissions(self.stage_type(), &emissions, output)
    }

    fn reset(&mut self) {
        self.frontend.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        self.frontend.write_state(w);
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        self.frontend.read_state(r)
    }
}

/// Mel-frequency cepstral coefficients per analysis frame.
pub struct MfccStage {
    frontend: MelFrontend,
    num_coefficients: usize,
    use_log_energy: bool,
    lifter_coefficient: f64,
}

impl MfccStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let frontend = MelFrontend::from_params(params)?;
        let num_coefficients = params.usize_or("numCoefficients", 13)?;
        if num_coefficients == 0 || num_coefficients > frontend.num_bands {
            return Err(SfError::invalid(format!(
                "'numCoefficients' must lie in 1..={}",
                frontend.num_bands
            )));
        }
        Ok(Self {
            frontend,
            num_coefficients,
            use_log_energy: params.bool_or("useLogEnergy", false)?,
            lifter_coefficient: params.f64_or("lifterCoefficient", 0.0)?,
        })
    }
}

impl Stage for MfccStage {
    fn stage_type(&self) -> &'static str {
        "mfcc"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_sample_count(&self, input_samples: usize) -> usize {
        (input_samples / self.frontend.hop + 1) * self.num_coefficients
    }

    fn time_scale_factor(&self) -> f64 {
        self.frontend.hop as f64 / self.num_coefficients as f64
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
        while self.frontend.channels.len() < channels {
            let mf = self.frontend.make_fft()?;
            self.frontend.channels.push(mf);
        }
        let frames = input.len() / channels;
        let mut emissions: Vec<Vec<Sample>> = Vec::with_capacity(channels);
        for c in 0..channels {
            let mel_frames = self.frontend.mel_frames(c, input, channels, frames)?;
            let mut flat = Vec::with_capacity(mel_frames.len() * self.num_coefficients);
            for energies in mel_frames {
                let total_energy: f64 = energies.iter().map(|&e| e as f64).sum();
                let log_mel: Vec<Sample> = energies
                    .iter()
                    .map(|&e| (e as f64).max(1e-10).ln() as Sample)
                    .collect();
                let mut coeffs = vec![0.0 as Sample; self.num_coefficients];
                mel::dct_ii(&log_mel, &mut coeffs);
                if self.lifter_coefficient > 0.0 {
                    mel::lifter(&mut coeffs, self.lifter_coefficient);
                }
                if self.use_log_energy {
                    coeffs[0] = total_energy.max(1e-10).ln() as Sample;
                }
                flat.extend_from_slice(&coeffs);
            }
            emissions.push(flat);
        }
        interleave_emissions(self.stage_type(), &emissions, output)
    }

    fn reset(&mut self) {
        self.frontend.channels.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        self.frontend.write_state(w);
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        self.frontend.read_state(r)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WAVELET TRANSFORM
// ═══════════════════════════════════════════════════════════════════════════

/// Single-level DWT of each call's buffer: output is `[approx | detail]`
/// per channel, same total length. Buffers must be even-length.
pub struct WaveletTransformStage {
    filter: WaveletFilter,
    kind: WaveletKind,
}

impl WaveletTransformStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let name = params.str_or("wavelet", "haar")?;
        let kind = WaveletKind::from_name(name).ok_or_else(|| {
            SfError::invalid(format!(
                "parameter 'wavelet' has unknown value \"{name}\" (haar, db1..db10)"
            ))
        })?;
        Ok(Self {
            filter: WaveletFilter::new(kind)?,
            kind,
        })
    }
}

impl Stage for WaveletTransformStage {
    fn stage_type(&self) -> &'static str {
        "waveletTransform"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let frames = samples.len() / channels;
        if frames == 0 {
            return Ok(());
        }
        if frames % 2 != 0 {
            return Err(SfError::stage(
                self.stage_type(),
                format!(
                    "{} ({}) needs even-length buffers, got {frames} samples",
                    self.kind.name(),
                    self.filter.len()
                ),
            ));
        }
        let mut scratch = vec![0.0 as Sample; frames];
        let mut coeffs = vec![0.0 as Sample; frames];
        for c in 0..channels {
            simd::extract_channel(samples, channels, c, &mut scratch);
            dwt_single(&self.filter, &scratch, &mut coeffs)?;
            simd::scatter_channel(&coeffs, channels, c, samples);
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
    fn fft_stage_emits_per_block() {
        let mut s = FftStage::from_params(
            &params!({"size": 8, "type": "real", "output": "magnitude"}),
        )
        .unwrap();
        let input = vec![1.0; 20];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        // two full blocks of 8 -> two frames of 5 bins
        assert_eq!(produced, 10);
        // DC bin of an all-ones block is 8
        assert!((out[0] - 8.0).abs() < 1e-4);
        assert!(out[1].abs() < 1e-4);
    }

    #[test]
    fn fft_inverse_needs_complex() {
        assert!(FftStage::from_params(&params!({"size": 8, "forward": false})).is_err());
    }

    #[test]
    fn fft_complex_round_trips_through_two_stages() {
        let mut fwd = FftStage::from_params(
            &params!({"size": 8, "type": "complex", "output": "complex"}),
        )
        .unwrap();
        let mut inv = FftStage::from_params(
            &params!({"size": 8, "type": "complex", "forward": false, "output": "complex"}),
        )
        .unwrap();
        let input: Vec<Sample> = (0..16).map(|i| (i as Sample * 0.3).sin()).collect();
        let mut spec = Vec::new();
        fwd.process_resizing(&input, &mut spec, 1, None).unwrap();
        let mut back = Vec::new();
        inv.process_resizing(&spec, &mut back, 1, None).unwrap();
        assert_eq!(back.len(), input.len());
        for i in 0..input.len() {
            assert!((input[i] - back[i]).abs() < 1e-4, "value {i}");
        }
    }

    #[test]
    fn stft_frame_cadence() {
        let mut s =
            StftStage::from_params(&params!({"windowSize": 16, "hopSize": 4, "window": "hann"}))
                .unwrap();
        let input = vec![0.5; 40];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        // 40 samples / hop 4 = 10 frames of 9 bins
        assert_eq!(produced, 90);
    }

    #[test]
    fn hilbert_envelope_of_tone_is_flat() {
        let mut s = HilbertEnvelopeStage::from_params(&params!({})).unwrap();
        let n = 256;
        let mut buf: Vec<Sample> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 16.0 * i as f32 / n as f32).cos())
            .collect();
        s.process(&mut buf, 1, None).unwrap();
        // away from the edges the envelope of a pure tone is 1
        for &v in &buf[32..n - 32] {
            assert!((v - 1.0).abs() < 0.05, "envelope {v}");
        }
    }

    #[test]
    fn mel_stage_emits_band_frames() {
        let mut s = MelSpectrogramStage::from_params(&params!({
            "numBins": 17, "numMelBands": 6, "sampleRate": 8000.0, "hopSize": 8
        }))
        .unwrap();
        // windowSize defaults to 32
        let input: Vec<Sample> = (0..64).map(|i| (i as f32 * 0.4).sin()).collect();
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        assert_eq!(produced, (64 / 8) * 6);
        assert!(out.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn mfcc_emits_requested_coefficients() {
        let mut s = MfccStage::from_params(&params!({
            "numBins": 17, "numMelBands": 10, "sampleRate": 8000.0,
            "hopSize": 16, "numCoefficients": 5, "lifterCoefficient": 22.0
        }))
        .unwrap();
        let input: Vec<Sample> = (0..64).map(|i| (i as f32 * 0.25).cos()).collect();
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        assert_eq!(produced, (64 / 16) * 5);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn wavelet_stage_keeps_length_and_energy() {
        let mut s = WaveletTransformStage::from_params(&params!({"wavelet": "db2"})).unwrap();
        let mut buf: Vec<Sample> = (0..32).map(|i| (i as f32 * 0.7).sin()).collect();
        let energy_in: f64 = buf.iter().map(|&x| (x as f64) * (x as f64)).sum();
        s.process(&mut buf, 1, None).unwrap();
        let energy_out: f64 = buf.iter().map(|&x| (x as f64) * (x as f64)).sum();
        assert!((energy_in - energy_out).abs() / energy_in < 1e-4);
    }

    #[test]
    fn wavelet_rejects_odd_buffers() {
        let mut s = WaveletTransformStage::from_params(&params!({"wavelet": "haar"})).unwrap();
        let mut buf = vec![1.0, 2.0, 3.0];
        assert!(s.process(&mut buf, 1, None).is_err());
    }
}
