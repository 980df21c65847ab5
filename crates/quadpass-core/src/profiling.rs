//! Profiling utilities based on the `puffin` crate.
//!
//! With the `profiling` feature disabled the scope macros expand to nothing
//! and the functions are no-ops, so call sites never need a `cfg`.

#[cfg(feature = "profiling")]
pub use puffin::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
#[macro_export]
#[doc(hidden)]
macro_rules! __quadpass_profile_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "profiling"))]
pub use crate::__quadpass_profile_noop as profile_function;
#[cfg(not(feature = "profiling"))]
pub use crate::__quadpass_profile_noop as profile_scope;

/// Turn scope collection on or off.
#[inline]
pub fn set_enabled(enabled: bool) {
    #[cfg(feature = "profiling")]
    puffin::set_scopes_on(enabled);
    #[cfg(not(feature = "profiling"))]
    let _ = enabled;
}

/// Whether scopes are currently collected.
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "profiling")]
    {
        puffin::are_scopes_on()
    }
    #[cfg(not(feature = "profiling"))]
    {
        false
    }
}

/// Mark the start of a new frame for profiling.
///
/// Call this once per frame in the host loop, next to
/// `PassContext::poll_readbacks`.
#[inline]
pub fn new_frame() {
    #[cfg(feature = "profiling")]
    puffin::GlobalProfiler::lock().new_frame();
}
