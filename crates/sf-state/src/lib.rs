//! sf-state: Binary snapshot codec for SignalForge
//!
//! Tagged, length-prefixed typed values used to serialize and restore stage
//! state. The stream is a flat sequence of tag-prefixed values; objects and
//! arrays are delimited by start/end tags, so any value can be skipped
//! without knowing its layout (the loader uses this for its validation pass
//! before any stage state is touched).
//!
//! All scalars are little-endian. Set `DSPX_DEBUG_TOON=1` to trace codec
//! activity via `log::trace!`; tracing has no semantic effect.

mod codec;

pub use codec::*;
