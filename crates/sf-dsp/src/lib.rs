//! sf-dsp: DSP kernels for SignalForge
//!
//! The algorithmic layer under the pipeline engine.
//!
//! ## Core Modules
//! - `simd` - Runtime SIMD dispatch (AVX2/SSE2/NEON/scalar)
//! - `sliding` - Sliding-window filter engine with incremental policies
//! - `window` - Analysis window functions
//!
//! ## Transform Modules
//! - `fft` - Radix-2 FFT with real-optimized transforms, DFT fallback
//! - `moving_fft` - Hop-driven streaming FFT frame producer
//! - `wavelet` - Single-level DWT (Haar, Daubechies)
//! - `mel` - Mel filterbank construction and DCT-II for cepstra
//!
//! ## Filter Modules
//! - `fir` - FIR core and windowed-sinc designs
//! - `iir` - Direct-form-I IIR core, classic designs, stability test
//! - `adaptive` - LMS/NLMS, RLS and scalar Kalman cores
//! - `resample` - Polyphase interpolator / decimator / rational resampler
//!
//! ## Analysis
//! - `matrix` - One-shot PCA / ICA / whitening / CSP / beamformer helpers

pub mod adaptive;
pub mod fft;
pub mod fir;
pub mod iir;
pub mod matrix;
pub mod mel;
pub mod moving_fft;
pub mod resample;
pub mod simd;
pub mod sliding;
pub mod wavelet;
pub mod window;

pub use window::WindowKind;
