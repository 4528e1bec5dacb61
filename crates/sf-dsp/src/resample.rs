//! Polyphase resamplers: interpolator, decimator, rational resampler
//!
//! All three share one windowed-sinc prototype design. The interpolator and
//! the rational resampler evaluate only the polyphase branch an output sample
//! needs, so zero-stuffed samples are never multiplied; each branch is
//! normalized to unit DC gain so constant signals survive rate conversion.
//! All state (input history, phase counters) persists across calls.

use sf_core::{Sample, SfError, SfResult};

use crate::fir::{design_coefficients, FirBand, FirFilter};
use crate::window::WindowKind;

/// Default prototype length (taps) for the windowed-sinc designs.
pub const DEFAULT_ORDER: usize = 51;

/// Polyphase branch table: `phases[p][k]` multiplies the input sample `k`
/// steps behind the current one for output phase `p`.
#[derive(Debug, Clone)]
struct PolyphaseBank {
    phases: Vec<Vec<Sample>>,
    taps_per_phase: usize,
}

impl PolyphaseBank {
    /// Split an `order`-tap lowpass at `cutoff` into `l` branches, each
    /// normalized to unit DC gain.
    fn design(l: usize, order: usize, cutoff: f64) -> SfResult<Self> {
        let mut proto = design_coefficients(FirBand::Lowpass, order, cutoff, 0.0, WindowKind::Hamming)?
            .into_iter()
            .map(|c| c as f64)
            .collect::<Vec<_>>();
        // pad to a whole number of branches
        while proto.len() % l != 0 {
            proto.push(0.0);
        }
        let taps_per_phase = proto.len() / l;
        let mut phases = Vec::with_capacity(l);
        for p in 0..l {
            let mut branch: Vec<f64> = (0..taps_per_phase).map(|k| proto[p + k * l]).collect();
            let sum: f64 = branch.iter().sum();
            if sum.abs() > 1e-12 {
                for v in &mut branch {
                    *v /= sum;
                }
            }
            phases.push(branch.into_iter().map(|v| v as Sample).collect());
        }
        Ok(Self {
            phases,
            taps_per_phase,
        })
    }

    /// Evaluate branch `p` against the history (newest first).
    #[inline]
    fn eval(&self, p: usize, history: &[f64]) -> Sample {
        let mut acc = 0.0f64;
        for (k, &c) in self.phases[p].iter().enumerate() {
            acc += c as f64 * history[k];
        }
        acc as Sample
    }
}

/// Newest-first input history shared by the polyphase stages.
#[derive(Debug, Clone)]
struct History {
    data: Vec<f64>,
}

impl History {
    fn new(len: usize) -> Self {
        Self {
            data: vec![0.0; len.max(1)],
        }
    }

    #[inline]
    fn push(&mut self, x: Sample) {
        for i in (1..self.data.len()).rev() {
            self.data[i] = self.data[i - 1];
        }
        self.data[0] = x as f64;
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
    }

    fn to_samples(&self) -> Vec<Sample> {
        self.data.iter().map(|&v| v as Sample).collect()
    }

    fn restore(&mut self, s: &[Sample]) -> SfResult<()> {
        if s.len() != self.data.len() {
            return Err(SfError::CorruptSnapshot(
                "resampler history length mismatch".to_string(),
            ));
        }
        for (d, &v) in self.data.iter_mut().zip(s) {
            *d = v as f64;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERPOLATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Upsample by an integer factor L: zero-stuff, lowpass at pi/L, keep every
/// sample. Evaluated polyphase so only real inputs are multiplied.
#[derive(Debug, Clone)]
pub struct Interpolator {
    factor: usize,
    bank: PolyphaseBank,
    history: History,
}

impl Interpolator {
    pub fn new(factor: usize, order: usize) -> SfResult<Self> {
        if factor < 2 {
            return Err(SfError::invalid("interpolation factor must be at least 2"));
        }
        let bank = PolyphaseBank::design(factor, order, 0.5 / factor as f64)?;
        let history = History::new(bank.taps_per_phase);
        Ok(Self {
            factor,
            bank,
            history,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Exact output count: `n * L`.
    pub fn output_len(&self, n: usize) -> usize {
        n * self.factor
    }

    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) {
        for &x in input {
            self.history.push(x);
            for p in 0..self.factor {
                output.push(self.bank.eval(p, &self.history.data));
            }
        }
    }

    pub fn reset(&mut self) {
        self.history.reset();
    }

    pub fn snapshot_state(&self) -> Vec<Sample> {
        self.history.to_samples()
    }

    pub fn restore_state(&mut self, s: &[Sample]) -> SfResult<()> {
        self.history.restore(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DECIMATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Downsample by an integer factor M: lowpass at pi/M, keep every M-th.
/// The keep-phase persists across calls.
#[derive(Debug, Clone)]
pub struct Decimator {
    factor: usize,
    fir: FirFilter,
    phase: usize,
}

impl Decimator {
    pub fn new(factor: usize, order: usize) -> SfResult<Self> {
        if factor < 2 {
            return Err(SfError::invalid("decimation factor must be at least 2"));
        }
        let fir = FirFilter::design(
            FirBand::Lowpass,
            order,
            0.5 / factor as f64,
            0.0,
            WindowKind::Hamming,
        )?;
        Ok(Self {
            factor,
            fir,
            phase: 0,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Estimated output count: `floor(n / M)`; the streaming phase can shift
    /// the actual count by one.
    pub fn output_len(&self, n: usize) -> usize {
        n / self.factor
    }

    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) {
        for &x in input {
            let y = self.fir.process_sample(x);
            if self.phase == 0 {
                output.push(y);
            }
            self.phase = (self.phase + 1) % self.factor;
        }
    }

    pub fn reset(&mut self) {
        self.fir.reset();
        self.phase = 0;
    }

    pub fn snapshot_state(&self) -> (Vec<Sample>, usize) {
        (self.fir.snapshot_state(), self.phase)
    }

    pub fn restore_state(&mut self, delay: &[Sample], phase: usize) -> SfResult<()> {
        self.fir.restore_state(delay)?;
        self.phase = phase % self.factor;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RATIONAL RESAMPLER
// ═══════════════════════════════════════════════════════════════════════════

/// Rational L/M resampler: polyphase upsample by L fused with decimation by
/// M, so only the L branch outputs that survive decimation are evaluated.
#[derive(Debug, Clone)]
pub struct Resampler {
    up: usize,
    down: usize,
    bank: PolyphaseBank,
    history: History,
    /// Next output's branch offset within the current input position.
    phase: usize,
}

impl Resampler {
    pub fn new(up: usize, down: usize, order: usize) -> SfResult<Self> {
        if up == 0 || down == 0 {
            return Err(SfError::invalid("resampling factors must be non-zero"));
        }
        if up == 1 && down == 1 {
            return Err(SfError::invalid("resampling 1/1 is the identity"));
        }
        // anti-alias below the tighter of the two Nyquists
        let cutoff = 0.5 / up.max(down) as f64;
        let bank = PolyphaseBank::design(up, order, cutoff)?;
        let history = History::new(bank.taps_per_phase);
        Ok(Self {
            up,
            down,
            bank,
            history,
            phase: 0,
        })
    }

    pub fn up_factor(&self) -> usize {
        self.up
    }

    pub fn down_factor(&self) -> usize {
        self.down
    }

    /// Estimated output count: `floor(n * L / M)`; retained filter memory can
    /// shift the actual count by one on a streaming boundary.
    pub fn output_len(&self, n: usize) -> usize {
        n * self.up / self.down
    }

    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) {
        for &x in input {
            self.history.push(x);
            // emit every branch hit by the M-stride inside this input's span
            while self.phase < self.up {
                output.push(self.bank.eval(self.phase, &self.history.data));
                self.phase += self.down;
            }
            self.phase -= self.up;
        }
    }

    pub fn reset(&mut self) {
        self.history.reset();
        self.phase = 0;
    }

    pub fn snapshot_state(&self) -> (Vec<Sample>, usize) {
        (self.history.to_samples(), self.phase)
    }

    pub fn restore_state(&mut self, history: &[Sample], phase: usize) -> SfResult<()> {
        self.history.restore(history)?;
        self.phase = phase;
        Ok(())
    }
}
