//! sf-engine: the SignalForge pipeline engine
//!
//! A pipeline is an ordered chain of stages that interleaved f32 buffers are
//! pushed through. Per-stage state persists across calls so successive
//! buffers form one continuous stream; stages may change the sample count
//! and/or channel count, and the executor reinterpolates timestamps through
//! every rate change. The whole pipeline state can be snapshotted into the
//! binary format of `sf-state` and restored later.
//!
//! ## Modules
//! - `stage` - The stage contract every link in the chain honors
//! - `stages` - One adapter per recognized stage type
//! - `align` - Irregular-to-uniform time alignment
//! - `pipeline` - Buffer management, dispatch, busy lock, async offload
//! - `registry` - Stage-type name to constructor mapping
//! - `params` - Typed access to the stage option maps

mod debug;
mod params;
mod pipeline;
mod registry;
mod stage;
mod worker;

pub mod align;
pub mod stages;

pub use params::StageParams;

// re-exported for the `params!` macro body
#[doc(hidden)]
pub use serde_json;
pub use pipeline::{Pipeline, PipelineStateSummary, ProcessHandle, ProcessOptions, StageSummary};
pub use registry::{create_stage, is_registered, registered_types};
pub use stage::Stage;
