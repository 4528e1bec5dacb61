//! Debug tracing gates, read once from the environment.
//!
//! `DSPX_DEBUG` enables the verbose executor trace; `DSPX_DEBUG_STAGE_DUMPS`
//! adds first-8-sample dumps after each stage. Neither changes semantics.

use std::sync::OnceLock;

pub(crate) fn executor_trace() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var_os("DSPX_DEBUG").is_some())
}

pub(crate) fn stage_dumps() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var_os("DSPX_DEBUG_STAGE_DUMPS").is_some())
}
