//! Stage-factory registry: type name -> validated constructor
//!
//! Built once, read-only afterwards. Every constructor validates its
//! parameter set and returns a fresh stage or `InvalidArgument`; a name the
//! registry does not know fails with `UnknownStage`.

use std::collections::HashMap;
use std::sync::OnceLock;

use sf_core::{SfError, SfResult};
use sf_dsp::sliding::{MeanAbsoluteValuePolicy, MeanPolicy, RmsPolicy, VariancePolicy};

use crate::align::TimeAlignmentStage;
use crate::stage::Stage;
use crate::stages::adaptive::{KalmanFilterStage, LmsFilterStage, RlsFilterStage};
use crate::stages::channels::{ChannelMergeStage, ChannelSelectStage, ChannelSelectorStage};
use crate::stages::features::{
    IndicatorCountStage, LinearRegressionStage, PeakDetectionStage, RegressionOutput,
    WaveformLengthStage,
};
use crate::stages::filters::{ConvolutionStage, FilterBankStage, FirFilterStage, IirFilterStage};
use crate::stages::matrix::{GscPreprocessorStage, MatrixKind, MatrixTransformStage};
use crate::stages::pointwise::{
    AmplifyStage, ClipDetectionStage, DifferentiatorStage, IntegratorStage, RectifyStage,
    SquareStage,
};
use crate::stages::resample::{DecimateStage, InterpolateStage, ResampleStage};
use crate::stages::spectral::{
    FftStage, HilbertEnvelopeStage, MelSpectrogramStage, MfccStage, StftStage,
    WaveletTransformStage,
};
use crate::stages::stats::{
    CumulativeMovingAverageStage, ExponentialMovingAverageStage, SnrStage, StatStage, ZScoreStage,
};
use crate::StageParams;

type StageCtor = fn(&StageParams) -> SfResult<Box<dyn Stage>>;

macro_rules! ctor {
    ($ty:ty) => {
        (|params| Ok(Box::new(<$ty>::from_params(params)?) as Box<dyn Stage>)) as StageCtor
    };
}

fn registry() -> &'static HashMap<&'static str, StageCtor> {
    static REGISTRY: OnceLock<HashMap<&'static str, StageCtor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, StageCtor> = HashMap::new();

        // moving/batch statistics
        m.insert("movingAverage", ctor!(StatStage<MeanPolicy>));
        m.insert("rms", ctor!(StatStage<RmsPolicy>));
        m.insert("variance", ctor!(StatStage<VariancePolicy>));
        m.insert("meanAbsoluteValue", ctor!(StatStage<MeanAbsoluteValuePolicy>));
        m.insert("zScoreNormalize", ctor!(ZScoreStage));
        m.insert("cumulativeMovingAverage", ctor!(CumulativeMovingAverageStage));
        m.insert("exponentialMovingAverage", ctor!(ExponentialMovingAverageStage));
        m.insert("snr", ctor!(SnrStage));

        // pointwise
        m.insert("rectify", ctor!(RectifyStage));
        m.insert("square", ctor!(SquareStage));
        m.insert("amplify", ctor!(AmplifyStage));
        m.insert("differentiator", ctor!(DifferentiatorStage));
        m.insert("integrator", ctor!(IntegratorStage));
        m.insert("clipDetection", ctor!(ClipDetectionStage));

        // features
        m.insert("waveformLength", ctor!(WaveformLengthStage));
        m.insert("slopeSignChange", |p| {
            Ok(Box::new(IndicatorCountStage::slope_sign_change(p)?))
        });
        m.insert("willisonAmplitude", |p| {
            Ok(Box::new(IndicatorCountStage::willison_amplitude(p)?))
        });
        m.insert("peakDetection", ctor!(PeakDetectionStage));
        m.insert("linearRegressionSlope", |p| {
            Ok(Box::new(LinearRegressionStage::from_params(
                RegressionOutput::Slope,
                p,
            )?))
        });
        m.insert("linearRegressionIntercept", |p| {
            Ok(Box::new(LinearRegressionStage::from_params(
                RegressionOutput::Intercept,
                p,
            )?))
        });
        m.insert("linearRegressionResiduals", |p| {
            Ok(Box::new(LinearRegressionStage::from_params(
                RegressionOutput::Residuals,
                p,
            )?))
        });
        m.insert("linearRegressionPredictions", |p| {
            Ok(Box::new(LinearRegressionStage::from_params(
                RegressionOutput::Predictions,
                p,
            )?))
        });

        // filters
        m.insert("filter:fir", ctor!(FirFilterStage));
        m.insert("filter:iir", ctor!(IirFilterStage));
        m.insert("filterBank", ctor!(FilterBankStage));
        m.insert("convolution", ctor!(ConvolutionStage));

        // adaptive
        m.insert("lmsFilter", ctor!(LmsFilterStage));
        m.insert("rlsFilter", ctor!(RlsFilterStage));
        m.insert("kalmanFilter", ctor!(KalmanFilterStage));

        // spectral
        m.insert("fft", ctor!(FftStage));
        m.insert("stft", ctor!(StftStage));
        m.insert("hilbertEnvelope", ctor!(HilbertEnvelopeStage));
        m.insert("melSpectrogram", ctor!(MelSpectrogramStage));
        m.insert("mfcc", ctor!(MfccStage));
        m.insert("waveletTransform", ctor!(WaveletTransformStage));

        // rate conversion
        m.insert("interpolate", ctor!(InterpolateStage));
        m.insert("decimate", ctor!(DecimateStage));
        m.insert("resample", ctor!(ResampleStage));
        m.insert("timeAlignment", ctor!(TimeAlignmentStage));

        // channel shape
        m.insert("channelSelect", ctor!(ChannelSelectStage));
        m.insert("channelSelector", ctor!(ChannelSelectorStage));
        m.insert("channelMerge", ctor!(ChannelMergeStage));

        // matrix transforms
        m.insert("pcaTransform", |p| {
            Ok(Box::new(MatrixTransformStage::from_params(MatrixKind::Pca, p)?))
        });
        m.insert("icaTransform", |p| {
            Ok(Box::new(MatrixTransformStage::from_params(MatrixKind::Ica, p)?))
        });
        m.insert("whiteningTransform", |p| {
            Ok(Box::new(MatrixTransformStage::from_params(
                MatrixKind::Whitening,
                p,
            )?))
        });
        m.insert("cspTransform", |p| {
            Ok(Box::new(MatrixTransformStage::from_params(MatrixKind::Csp, p)?))
        });
        m.insert("gscPreprocessor", ctor!(GscPreprocessorStage));

        m
    })
}

/// Construct a stage by registry name.
pub fn create_stage(stage_type: &str, params: &StageParams) -> SfResult<Box<dyn Stage>> {
    let ctor = registry()
        .get(stage_type)
        .ok_or_else(|| SfError::UnknownStage(stage_type.to_string()))?;
    ctor(params)
}

/// Whether a type name is recognized.
pub fn is_registered(stage_type: &str) -> bool {
    registry().contains_key(stage_type)
}

/// All recognized type names, sorted.
pub fn registered_types() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn known_types_construct() {
        let cases: Vec<(&str, StageParams)> = vec![
            ("movingAverage", params!({"mode": "moving", "windowSize": 4})),
            ("rms", params!({"mode": "batch"})),
            ("rectify", params!({"mode": "half"})),
            ("amplify", params!({"gain": 0.5})),
            ("waveformLength", params!({"windowSize": 16})),
            ("filter:fir", params!({"taps": [0.5, 0.5]})),
            ("convolution", params!({"kernel": [1.0, 0.5]})),
            ("lmsFilter", params!({"numTaps": 4, "mu": 0.01})),
            ("fft", params!({"size": 16})),
            ("stft", params!({"windowSize": 32})),
            ("waveletTransform", params!({"wavelet": "db3"})),
            ("interpolate", params!({"factor": 2})),
            ("decimate", params!({"factor": 2})),
            ("resample", params!({"upFactor": 3, "downFactor": 2})),
            ("timeAlignment", params!({"targetSampleRate": 100.0})),
            ("channelSelect", params!({"channel": 0})),
            (
                "pcaTransform",
                params!({"matrix": [1.0, 0.0], "numChannels": 2, "numComponents": 1}),
            ),
            ("gscPreprocessor", params!({"numChannels": 2})),
        ];
        for (name, p) in cases {
            assert!(is_registered(name), "{name} missing from registry");
            create_stage(name, &p).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn unknown_type_fails() {
        assert!(matches!(
            create_stage("nope", &params!({})),
            Err(SfError::UnknownStage(_))
        ));
        assert!(!is_registered("nope"));
    }

    #[test]
    fn registry_covers_the_option_tables() {
        for name in [
            "movingAverage",
            "rms",
            "variance",
            "meanAbsoluteValue",
            "zScoreNormalize",
            "rectify",
            "waveformLength",
            "slopeSignChange",
            "willisonAmplitude",
            "cumulativeMovingAverage",
            "exponentialMovingAverage",
            "interpolate",
            "decimate",
            "resample",
            "convolution",
            "linearRegressionSlope",
            "linearRegressionIntercept",
            "linearRegressionResiduals",
            "linearRegressionPredictions",
            "lmsFilter",
            "rlsFilter",
            "waveletTransform",
            "hilbertEnvelope",
            "stft",
            "fft",
            "melSpectrogram",
            "mfcc",
            "pcaTransform",
            "icaTransform",
            "whiteningTransform",
            "cspTransform",
            "gscPreprocessor",
            "channelSelect",
            "channelMerge",
            "channelSelector",
            "filterBank",
            "clipDetection",
            "peakDetection",
            "differentiator",
            "square",
            "amplify",
            "integrator",
            "snr",
            "kalmanFilter",
            "timeAlignment",
            "filter:fir",
            "filter:iir",
        ] {
            assert!(is_registered(name), "{name} missing");
        }
    }
}
