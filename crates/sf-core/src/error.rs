//! Error types for SignalForge

use thiserror::Error;

/// Engine-wide error type.
///
/// Every fallible operation in the workspace surfaces one of these kinds;
/// stage-internal failures are wrapped in [`SfError::Stage`] with the stage
/// type attached so the caller can locate the offending link in the chain.
#[derive(Error, Debug)]
pub enum SfError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown stage type: '{0}'")]
    UnknownStage(String),

    #[error("Pipeline is busy")]
    Busy,

    #[error("Pipeline has been disposed")]
    Disposed,

    #[error("Non-monotonic timestamp: {current} ms after {previous} ms")]
    NonMonotonic { previous: f64, current: f64 },

    #[error("Buffer is empty")]
    Empty,

    #[error("Buffer is full")]
    Full,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage '{stage_type}' failed: {message}")]
    Stage {
        stage_type: String,
        message: String,
    },

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Snapshot stage count mismatch: snapshot has {snapshot}, pipeline has {pipeline}")]
    StageCountMismatch { snapshot: usize, pipeline: usize },

    #[error("Snapshot stage type mismatch at index {index}: snapshot has '{snapshot}', pipeline has '{pipeline}'")]
    StageTypeMismatch {
        index: usize,
        snapshot: String,
        pipeline: String,
    },

    #[error("Unstable filter: a pole lies on or outside the unit circle")]
    Unstable,

    #[error("Numeric failure: {0}")]
    NumericFailure(String),
}

impl SfError {
    /// Wrap a stage-internal failure with the stage type for context.
    pub fn stage(stage_type: &str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage_type: stage_type.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Result type alias
pub type SfResult<T> = Result<T, SfError>;
