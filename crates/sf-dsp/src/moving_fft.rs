//! Moving FFT: ring buffer + window + hop-size-driven frame producer
//!
//! Streams samples in one at a time and emits a windowed spectrum every time
//! enough new samples have accumulated: every `hop` samples in moving mode,
//! every full `size` samples in batched mode. After an emission `hop` samples
//! are consumed from the tail, so overlapping frames share the retained
//! portion of the ring.

use num_complex::Complex;
use sf_core::{RingBuffer, Sample, SfError, SfResult};

use crate::fft::FftEngine;
use crate::simd;
use crate::window::WindowKind;

/// Frame emission mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftMode {
    /// Emit once per full frame of `size` samples
    Batched,
    /// Emit every `hop` samples (overlapping frames)
    #[default]
    Moving,
}

/// Streaming FFT frame producer.
#[derive(Debug)]
pub struct MovingFft {
    engine: FftEngine,
    ring: RingBuffer,
    window: Vec<Sample>,
    hop: usize,
    mode: FftMode,
    pending: usize,
    frame: Vec<Sample>,
    windowed: Vec<Sample>,
}

impl MovingFft {
    pub fn new(size: usize, hop: usize, window: WindowKind, mode: FftMode) -> SfResult<Self> {
        if size == 0 {
            return Err(SfError::invalid("moving FFT size must be non-zero"));
        }
        let hop = match mode {
            FftMode::Batched => size,
            FftMode::Moving => {
                if hop == 0 || hop > size {
                    return Err(SfError::invalid(format!(
                        "hop size {hop} must be in 1..={size}"
                    )));
                }
                hop
            }
        };
        Ok(Self {
            engine: FftEngine::new(size)?,
            ring: RingBuffer::new(size),
            window: window.coefficients(size),
            hop,
            mode,
            pending: 0,
            frame: vec![0.0; size],
            windowed: vec![0.0; size],
        })
    }

    pub fn size(&self) -> usize {
        self.engine.size()
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn mode(&self) -> FftMode {
        self.mode
    }

    /// Bins per emitted spectrum: size/2 + 1.
    pub fn bins(&self) -> usize {
        self.engine.real_bins()
    }

    fn threshold(&self) -> usize {
        match self.mode {
            FftMode::Batched => self.engine.size(),
            FftMode::Moving => self.hop,
        }
    }

    /// Enqueue one sample; emits a spectrum when a frame is due.
    pub fn add_sample(&mut self, x: Sample) -> SfResult<Option<Vec<Complex<Sample>>>> {
        self.ring.push_overwrite(x);
        self.pending += 1;
        if self.pending < self.threshold() {
            return Ok(None);
        }
        self.pending -= self.threshold();
        self.emit().map(Some)
    }

    /// Bulk driver: yields every spectrum produced by the slice.
    pub fn add_samples(&mut self, xs: &[Sample]) -> SfResult<Vec<Vec<Complex<Sample>>>> {
        let mut out = Vec::new();
        for &x in xs {
            if let Some(spec) = self.add_sample(x)? {
                out.push(spec);
            }
        }
        Ok(out)
    }

    /// Extract the current frame (zero-padded at the front while warming up),
    /// window it, transform, and consume `hop` samples from the tail.
    fn emit(&mut self) -> SfResult<Vec<Complex<Sample>>> {
        let size = self.engine.size();
        let count = self.ring.len();
        self.frame[..size - count].fill(0.0);
        self.ring.copy_to(&mut self.frame[size - count..]);

        simd::apply_window(&self.frame, &self.window, &mut self.windowed);
        let mut spec = vec![Complex::new(0.0, 0.0); self.engine.real_bins()];
        self.engine.rfft(&self.windowed, &mut spec)?;

        // Consume hop samples from the tail; during warmup only discard down
        // to the size-hop overlap so early frames keep their history.
        let retain = size - self.hop;
        let discard = count.saturating_sub(retain);
        for _ in 0..discard {
            let _ = self.ring.pop();
        }
        Ok(spec)
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.pending = 0;
    }

    /// Ring contents and pending counter for snapshotting.
    pub fn snapshot_state(&self) -> (Vec<Sample>, usize) {
        (self.ring.to_vec(), self.pending)
    }

    pub fn restore_state(&mut self, samples: &[Sample], pending: usize) {
        self.ring.fill_from(samples);
        self.pending = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batched_emits_once_per_frame() {
        let mut mf = MovingFft::new(8, 0, WindowKind::Rect, FftMode::Batched).unwrap();
        let specs = mf.add_samples(&[1.0; 20]).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].len(), 5);
        // DC bin of a rectangular all-ones frame is the frame sum
        assert!((specs[0][0].re - 8.0).abs() < 1e-4);
        assert!(specs[0][1].norm() < 1e-4);
    }

    #[test]
    fn moving_emits_every_hop() {
        let mut mf = MovingFft::new(8, 2, WindowKind::Hann, FftMode::Moving).unwrap();
        let specs = mf.add_samples(&vec![1.0; 16]).unwrap();
        assert_eq!(specs.len(), 8);
    }

    #[test]
    fn hop_must_fit() {
        assert!(MovingFft::new(8, 16, WindowKind::Hann, FftMode::Moving).is_err());
        assert!(MovingFft::new(8, 0, WindowKind::Hann, FftMode::Moving).is_err());
    }

    #[test]
    fn overlapping_frames_share_tail() {
        let mut mf = MovingFft::new(4, 2, WindowKind::Rect, FftMode::Moving).unwrap();
        // ramp: frames should see [0 0 1 2], [1 2 3 4], ...
        let specs = mf.add_samples(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(specs.len(), 2);
        assert!((specs[0][0].re - 3.0).abs() < 1e-4); // 0+0+1+2
        assert!((specs[1][0].re - 10.0).abs() < 1e-4); // 1+2+3+4
    }
}
