//! Filter stages: filter:fir, filter:iir, filterBank and streaming
//! convolution (direct or FFT overlap-add).

use num_complex::Complex;
use sf_core::{Sample, SfError, SfResult, TimestampMs};
use sf_dsp::fft::FftEngine;
use sf_dsp::fir::{design_coefficients, FirBand, FirFilter};
use sf_dsp::iir::{BiquadKind, IirBand, IirFilter};
use sf_dsp::simd;
use sf_dsp::sliding::{ConvolutionPolicy, SlidingWindow};
use sf_dsp::window::WindowKind;
use sf_state::{SnapshotReader, SnapshotWriter};

use crate::stage::{ensure_channels, read_window, write_window, Stage};
use crate::StageParams;

// ═══════════════════════════════════════════════════════════════════════════
// FIR STAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Per-channel FIR filter, stateful or stateless per call.
pub struct FirFilterStage {
    prototype: FirFilter,
    stateless: bool,
    channels: Vec<FirFilter>,
}

impl FirFilterStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let prototype = if let Some(taps) = params.f32_array_opt("taps")? {
            FirFilter::new(taps)?
        } else {
            let band = match params.str_or("design", "lowpass")? {
                "lowpass" => FirBand::Lowpass,
                "highpass" => FirBand::Highpass,
                "bandpass" => FirBand::Bandpass,
                "bandstop" => FirBand::Bandstop,
                other => {
                    return Err(SfError::invalid(format!(
                        "parameter 'design' has unknown value \"{other}\""
                    )))
                }
            };
            let order = params.usize_or("order", 51)?;
            let sample_rate = params.f64_or("sampleRate", 0.0)?;
            // cutoffs in Hz when a sample rate is given, cycles/sample otherwise
            let normalize = |hz: f64| -> f64 {
                if sample_rate > 0.0 {
                    hz / sample_rate
                } else {
                    hz
                }
            };
            let cutoff = normalize(params.f64("cutoff")?);
            let cutoff2 = normalize(params.f64_or("cutoff2", 0.0)?);
            let window = params
                .str_opt("window")?
                .map(|name| {
                    WindowKind::from_name(name).ok_or_else(|| {
                        SfError::invalid(format!("parameter 'window' has unknown value \"{name}\""))
                    })
                })
                .transpose()?
                .unwrap_or(WindowKind::Hamming);
            FirFilter::new(design_coefficients(band, order, cutoff, cutoff2, window)?)?
        };
        Ok(Self {
            prototype,
            stateless: params.bool_or("stateless", false)?,
            channels: Vec::new(),
        })
    }
}

impl Stage for FirFilterStage {
    fn stage_type(&self) -> &'static str {
        "filter:fir"
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
        let stateless = self.stateless;
        for c in 0..channels {
            let filter = &mut self.channels[c];
            if stateless {
                let mut scratch = vec![0.0; frames];
                simd::extract_channel(samples, channels, c, &mut scratch);
                let mut out = vec![0.0; frames];
                filter.process(&scratch, &mut out, true);
                simd::scatter_channel(&out, channels, c, samples);
            } else {
                for i in 0..frames {
                    let idx = i * channels + c;
                    samples[idx] = filter.process_sample(samples[idx]);
                }
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
        for f in &self.channels {
            w.write_f32_array(&f.snapshot_state());
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
            let mut f = self.prototype.clone();
            f.reset();
            f.restore_state(&state)?;
            self.channels.push(f);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IIR STAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Per-channel IIR filter.
pub struct IirFilterStage {
    prototype: IirFilter,
    stateless: bool,
    channels: Vec<IirFilter>,
}

impl IirFilterStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let prototype = if params.has("b") || params.has("a") {
            let b = params
                .f64_array_opt("b")?
                .ok_or_else(|| SfError::invalid("missing required parameter 'b'"))?;
            let a = params.f64_array_opt("a")?.unwrap_or_else(|| vec![1.0]);
            IirFilter::new_checked(b, a)?
        } else {
            let design = params.str_or("design", "butterworth")?;
            let sample_rate = params.f64("sampleRate")?;
            let cutoff = params.f64("cutoff")?;
            match design {
                "butterworth" => {
                    let band = band_from(params)?;
                    IirFilter::butterworth(band, params.usize_or("order", 2)?, cutoff, sample_rate)?
                }
                "chebyshev" => {
                    let band = band_from(params)?;
                    IirFilter::chebyshev1(
                        band,
                        params.usize_or("order", 2)?,
                        params.f64_or("ripple", 1.0)?,
                        cutoff,
                        sample_rate,
                    )?
                }
                "firstOrder" => IirFilter::first_order(band_from(params)?, cutoff, sample_rate)?,
                biquad => {
                    let kind = BiquadKind::from_name(biquad).ok_or_else(|| {
                        SfError::invalid(format!(
                            "parameter 'design' has unknown value \"{biquad}\""
                        ))
                    })?;
                    IirFilter::biquad(
                        kind,
                        cutoff,
                        params.f64_or("q", std::f64::consts::FRAC_1_SQRT_2)?,
                        params.f64_or("gainDb", 0.0)?,
                        sample_rate,
                    )?
                }
            }
        };
        Ok(Self {
            prototype,
            stateless: params.bool_or("stateless", false)?,
            channels: Vec::new(),
        })
    }

    /// Raw-coefficient constructor backing `add_filter_stage`.
    pub fn from_coefficients(b: &[f64], a: &[f64]) -> SfResult<Self> {
        Ok(Self {
            prototype: IirFilter::new_checked(b.to_vec(), a.to_vec())?,
            stateless: false,
            channels: Vec::new(),
        })
    }
}

fn band_from(params: &StageParams) -> SfResult<IirBand> {
    match params.str_or("band", "lowpass")? {
        "lowpass" => Ok(IirBand::Lowpass),
        "highpass" => Ok(IirBand::Highpass),
        other => Err(SfError::invalid(format!(
            "parameter 'band' must be \"lowpass\" or \"highpass\", got \"{other}\""
        ))),
    }
}

impl Stage for IirFilterStage {
    fn stage_type(&self) -> &'static str {
        "filter:iir"
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
        for c in 0..channels {
            let filter = &mut self.channels[c];
            if self.stateless {
                let mut scratch = vec![0.0; frames];
                simd::extract_channel(samples, channels, c, &mut scratch);
                let mut out = vec![0.0; frames];
                filter.process(&scratch, &mut out, true);
                simd::scatter_channel(&out, channels, c, samples);
            } else {
                for i in 0..frames {
                    let idx = i * channels + c;
                    samples[idx] = filter.process_sample(samples[idx]);
                }
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
        for f in &self.channels {
            let (x, y) = f.snapshot_state();
            w.begin_object();
            w.field("x");
            w.write_f32_array(&x);
            w.field("y");
            w.write_f32_array(&y);
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
            r.expect_field("x")?;
            let x = r.read_f32_array()?;
            r.expect_field("y")?;
            let y = r.read_f32_array()?;
            r.expect_object_end()?;
            let mut f = self.prototype.clone();
            f.reset();
            f.restore_state(&x, &y)?;
            self.channels.push(f);
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

/// Build the stage used by `Pipeline::add_filter_stage`.
pub fn filter_stage_from_coefficients(b: &[f64], a: &[f64]) -> SfResult<Box<dyn Stage>> {
    Ok(Box::new(IirFilterStage::from_coefficients(b, a)?))
}

// ═══════════════════════════════════════════════════════════════════════════
// FILTER BANK
// ═══════════════════════════════════════════════════════════════════════════

/// Splits each input channel through a bank of band-pass biquads.
/// Output channel order: `[ch0 band0, ch0 band1, .., ch1 band0, ..]`.
pub struct FilterBankStage {
    bands: Vec<(f64, f64)>,
    num_channels: usize,
    prototypes: Vec<IirFilter>,
    /// One filter per (input channel, band)
    filters: Vec<IirFilter>,
}

impl FilterBankStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let bands = params.band_array("bands")?;
        if bands.is_empty() {
            return Err(SfError::invalid("parameter 'bands' must be non-empty"));
        }
        let sample_rate = params.f64("sampleRate")?;
        let num_channels = params.usize_or("numChannels", 1)?;
        if num_channels == 0 {
            return Err(SfError::invalid("parameter 'numChannels' must be positive"));
        }
        let mut prototypes = Vec::with_capacity(bands.len());
        for &(lo, hi) in &bands {
            if lo <= 0.0 || hi <= lo {
                return Err(SfError::invalid(format!(
                    "band [{lo}, {hi}] must satisfy 0 < low < high"
                )));
            }
            let center = (lo * hi).sqrt();
            let q = center / (hi - lo);
            prototypes.push(IirFilter::biquad(
                BiquadKind::Bandpass,
                center,
                q,
                0.0,
                sample_rate,
            )?);
        }
        Ok(Self {
            bands,
            num_channels,
            prototypes,
            filters: Vec::new(),
        })
    }
}

impl Stage for FilterBankStage {
    fn stage_type(&self) -> &'static str {
        "filterBank"
    }

    fn is_resizing(&self) -> bool {
        true
    }

    fn output_channel_count(&self) -> usize {
        self.num_channels * self.bands.len()
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
        let num_bands = self.bands.len();
        if self.filters.is_empty() {
            for _c in 0..channels {
                for proto in &self.prototypes {
                    self.filters.push(proto.clone());
                }
            }
        }
        let frames = input.len() / channels;
        for i in 0..frames {
            for c in 0..channels {
                let x = input[i * channels + c];
                for b in 0..num_bands {
                    let y = self.filters[c * num_bands + b].process_sample(x);
                    output.push(y);
                }
            }
        }
        Ok(frames * channels * num_bands)
    }

    fn reset(&mut self) {
        self.filters.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        w.field("filters");
        w.begin_array();
        for f in &self.filters {
            let (x, y) = f.snapshot_state();
            w.begin_object();
            w.field("x");
            w.write_f32_array(&x);
            w.field("y");
            w.write_f32_array(&y);
            w.end_object();
        }
        w.end_array();
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        r.expect_field("filters")?;
        r.expect_array_start()?;
        self.filters.clear();
        let num_bands = self.bands.len();
        let mut index = 0usize;
        while r.peek_tag()? != sf_state::Tag::ArrayEnd {
            r.expect_object_start()?;
            r.expect_field("x")?;
            let x = r.read_f32_array()?;
            r.expect_field("y")?;
            let y = r.read_f32_array()?;
            r.expect_object_end()?;
            let mut f = self.prototypes[index % num_bands].clone();
            f.reset();
            f.restore_state(&x, &y)?;
            self.filters.push(f);
            index += 1;
        }
        r.expect_array_end()?;
        r.expect_object_end()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONVOLUTION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvMethod {
    Direct,
    Fft,
}

/// Per-channel FFT overlap-add state.
struct OlaChannel {
    /// Pending tail from previous blocks (kernel_len - 1 values)
    tail: Vec<f64>,
}

/// Streaming causal convolution ("same" alignment with the kernel's first
/// tap on the current sample). Direct mode slides the SIMD dot product;
/// FFT mode runs overlap-add blocks with a retained tail.
pub struct ConvolutionStage {
    kernel: Vec<Sample>,
    method: ConvMethod,
    // direct
    windows: Vec<SlidingWindow<ConvolutionPolicy>>,
    // fft
    engine: Option<FftEngine>,
    kernel_spec: Vec<Complex<Sample>>,
    block_len: usize,
    ola: Vec<OlaChannel>,
}

impl ConvolutionStage {
    pub fn from_params(params: &StageParams) -> SfResult<Self> {
        let kernel = params.f32_array("kernel")?;
        if kernel.is_empty() {
            return Err(SfError::invalid("parameter 'kernel' must be non-empty"));
        }
        match params.str_or("mode", "same")? {
            "same" => {}
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'mode' only supports \"same\" in streaming pipelines, got \"{other}\""
                )))
            }
        }
        let auto_threshold = params.usize_or("autoThreshold", 64)?;
        let method = match params.str_or("method", "auto")? {
            "direct" => ConvMethod::Direct,
            "fft" => ConvMethod::Fft,
            "auto" => {
                if kernel.len() > auto_threshold {
                    ConvMethod::Fft
                } else {
                    ConvMethod::Direct
                }
            }
            other => {
                return Err(SfError::invalid(format!(
                    "parameter 'method' must be \"auto\", \"direct\" or \"fft\", got \"{other}\""
                )))
            }
        };

        let (engine, kernel_spec, block_len) = if method == ConvMethod::Fft {
            let fft_size = (kernel.len() * 2).next_power_of_two().max(64);
            let block_len = fft_size - kernel.len() + 1;
            let engine = FftEngine::new(fft_size)?;
            let mut padded = vec![0.0; fft_size];
            padded[..kernel.len()].copy_from_slice(&kernel);
            let mut spec = vec![Complex::new(0.0, 0.0); engine.real_bins()];
            engine.rfft(&padded, &mut spec)?;
            (Some(engine), spec, block_len)
        } else {
            (None, Vec::new(), 0)
        };

        Ok(Self {
            kernel,
            method,
            windows: Vec::new(),
            engine,
            kernel_spec,
            block_len,
            ola: Vec::new(),
        })
    }

    fn process_fft_channel(
        &mut self,
        channel: usize,
        input: &[Sample],
        out: &mut [Sample],
    ) -> SfResult<()> {
        let engine = self.engine.as_ref().expect("fft mode has an engine");
        let fft_size = engine.size();
        let klen = self.kernel.len();
        let mut written = 0usize;

        let mut padded = vec![0.0 as Sample; fft_size];
        let mut spec = vec![Complex::new(0.0, 0.0); engine.real_bins()];
        let mut prod = vec![Complex::new(0.0, 0.0); engine.real_bins()];
        let mut time = vec![0.0 as Sample; fft_size];

        for chunk in input.chunks(self.block_len) {
            padded[..chunk.len()].copy_from_slice(chunk);
            padded[chunk.len()..].fill(0.0);
            engine.rfft(&padded, &mut spec)?;
            simd::complex_multiply(&spec, &self.kernel_spec, &mut prod);
            engine.irfft(&prod, &mut time)?;

            let tail = &mut self.ola[channel].tail;
            let count = chunk.len() + klen - 1;
            for i in 0..count {
                let v = time[i];
                let acc = v as f64 + if i < tail.len() { tail[i] } else { 0.0 };
                if i < chunk.len() {
                    out[written + i] = acc as Sample;
                } else {
                    // beyond the emitted range: becomes the next tail
                    time[i] = acc as Sample;
                }
            }
            // slide the tail: overlap beyond this chunk's emissions
            let mut new_tail = vec![0.0f64; klen - 1];
            for (i, nt) in new_tail.iter_mut().enumerate() {
                let src = chunk.len() + i;
                if src < chunk.len() + klen - 1 {
                    *nt = time[src] as f64;
                }
            }
            *tail = new_tail;
            written += chunk.len();
        }
        Ok(())
    }
}

impl Stage for ConvolutionStage {
    fn stage_type(&self) -> &'static str {
        "convolution"
    }

    fn process(
        &mut self,
        samples: &mut [Sample],
        channels: usize,
        _timestamps: Option<&[TimestampMs]>,
    ) -> SfResult<()> {
        let frames = samples.len() / channels;
        match self.method {
            ConvMethod::Direct => {
                let kernel = self.kernel.clone();
                ensure_channels(&mut self.windows, channels, || {
                    SlidingWindow::new(kernel.len(), ConvolutionPolicy::new(&kernel))
                });
                for i in 0..frames {
                    for c in 0..channels {
                        let idx = i * channels + c;
                        samples[idx] = self.windows[c].add_sample(samples[idx]);
                    }
                }
            }
            ConvMethod::Fft => {
                let klen = self.kernel.len();
                ensure_channels(&mut self.ola, channels, || OlaChannel {
                    tail: vec![0.0; klen - 1],
                });
                let mut scratch = vec![0.0; frames];
                let mut out = vec![0.0; frames];
                for c in 0..channels {
                    simd::extract_channel(samples, channels, c, &mut scratch);
                    self.process_fft_channel(c, &scratch[..frames], &mut out)?;
                    simd::scatter_channel(&out, channels, c, samples);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.ola.clear();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.begin_object();
        match self.method {
            ConvMethod::Direct => {
                w.field("windows");
                w.begin_array();
                for sw in &self.windows {
                    write_window(w, sw);
                }
                w.end_array();
            }
            ConvMethod::Fft => {
                w.field("tails");
                w.begin_array();
                for ch in &self.ola {
                    let tail: Vec<Sample> = ch.tail.iter().map(|&v| v as Sample).collect();
                    w.write_f32_array(&tail);
                }
                w.end_array();
            }
        }
        w.end_object();
    }

    fn load_state(&mut self, r: &mut SnapshotReader) -> SfResult<()> {
        r.expect_object_start()?;
        match self.method {
            ConvMethod::Direct => {
                r.expect_field("windows")?;
                r.expect_array_start()?;
                self.windows.clear();
                while r.peek_tag()? != sf_state::Tag::ArrayEnd {
                    let mut sw =
                        SlidingWindow::new(self.kernel.len(), ConvolutionPolicy::new(&self.kernel));
                    read_window(r, &mut sw)?;
                    self.windows.push(sw);
                }
                r.expect_array_end()?;
            }
            ConvMethod::Fft => {
                r.expect_field("tails")?;
                r.expect_array_start()?;
                self.ola.clear();
                while r.peek_tag()? != sf_state::Tag::ArrayEnd {
                    let tail = r.read_f32_array()?;
                    self.ola.push(OlaChannel {
                        tail: tail.into_iter().map(|v| v as f64).collect(),
                    });
                }
                r.expect_array_end()?;
            }
        }
        r.expect_object_end()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn fir_stage_filters_per_channel() {
        let mut s = FirFilterStage::from_params(&params!({"taps": [0.5, 0.5]})).unwrap();
        let mut buf = vec![1.0, 10.0, 3.0, 30.0];
        s.process(&mut buf, 2, None).unwrap();
        assert_eq!(buf, vec![0.5, 5.0, 2.0, 20.0]);
    }

    #[test]
    fn iir_from_unstable_coefficients_fails() {
        assert!(IirFilterStage::from_coefficients(&[1.0], &[1.0, -2.0]).is_err());
    }

    #[test]
    fn direct_and_fft_convolution_agree() {
        let kernel: Vec<Sample> = (0..9).map(|i| ((i * 7 % 5) as Sample) * 0.1).collect();
        let signal: Vec<Sample> = (0..300).map(|i| ((i as Sample) * 0.13).sin()).collect();

        let mut direct = ConvolutionStage::from_params(
            &params!({"kernel": kernel.clone(), "method": "direct"}),
        )
        .unwrap();
        let mut fft =
            ConvolutionStage::from_params(&params!({"kernel": kernel.clone(), "method": "fft"}))
                .unwrap();

        let mut a = signal.clone();
        direct.process(&mut a, 1, None).unwrap();
        let mut b = signal.clone();
        fft.process(&mut b, 1, None).unwrap();

        for i in 0..signal.len() {
            assert!((a[i] - b[i]).abs() < 1e-4, "sample {i}: {} vs {}", a[i], b[i]);
        }
    }

    #[test]
    fn fft_convolution_streams_across_calls() {
        let kernel: Vec<Sample> = vec![0.25, 0.5, 0.25, 0.1, -0.2];
        let signal: Vec<Sample> = (0..200).map(|i| ((i as Sample) * 0.21).cos()).collect();

        let mut whole =
            ConvolutionStage::from_params(&params!({"kernel": kernel.clone(), "method": "fft"}))
                .unwrap();
        let mut split =
            ConvolutionStage::from_params(&params!({"kernel": kernel.clone(), "method": "fft"}))
                .unwrap();

        let mut a = signal.clone();
        whole.process(&mut a, 1, None).unwrap();

        let mut b1 = signal[..77].to_vec();
        split.process(&mut b1, 1, None).unwrap();
        let mut b2 = signal[77..].to_vec();
        split.process(&mut b2, 1, None).unwrap();
        let b: Vec<Sample> = b1.into_iter().chain(b2).collect();

        for i in 0..signal.len() {
            assert!((a[i] - b[i]).abs() < 1e-4, "sample {i}");
        }
    }

    #[test]
    fn auto_threshold_picks_method() {
        let small =
            ConvolutionStage::from_params(&params!({"kernel": [1.0, 2.0], "method": "auto"}))
                .unwrap();
        assert_eq!(small.method, ConvMethod::Direct);
        let big_kernel: Vec<f32> = vec![0.1; 100];
        let big = ConvolutionStage::from_params(
            &params!({"kernel": big_kernel, "method": "auto", "autoThreshold": 64}),
        )
        .unwrap();
        assert_eq!(big.method, ConvMethod::Fft);
    }

    #[test]
    fn filter_bank_fans_out_channels() {
        let mut s = FilterBankStage::from_params(&params!({
            "bands": [[100.0, 300.0], [300.0, 900.0]],
            "sampleRate": 8000.0,
            "numChannels": 1
        }))
        .unwrap();
        assert_eq!(s.output_channel_count(), 2);
        let input = vec![1.0, 0.0, 0.0, 0.0];
        let mut out = Vec::new();
        let produced = s.process_resizing(&input, &mut out, 1, None).unwrap();
        assert_eq!(produced, 8);
    }
}
