//! Structured logging shim.
//!
//! With the `tracing` feature enabled this re-exports the `tracing`
//! macros; without it the macros expand to nothing, so lifecycle logging
//! costs nothing in the default build.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {debug, trace};
