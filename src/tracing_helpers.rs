//! Logging macros that vanish without the `tracing` feature.
//!
//! Each macro expands to a block holding a single `tracing` event gated on
//! `cfg(feature = "tracing")`, so the default build carries no logging code
//! and no `tracing` dependency.
//!
//! ```bash
//! # Retries, backoff and rotations of a stress run
//! RUST_LOG=pavtree=trace cargo test --features tracing --test stress_tests
//! ```
//!
//! Mutating entry points also open a span through
//! `#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]`.
//! Keys and values are not required to be `Debug`, so neither spans nor
//! events record them.
//!
//! | Macro | Level | Used for |
//! |-------|-------|----------|
//! | `trace_log!` | TRACE | retries, lock backoff, rotations, unlinks |
//! | `debug_log!` | DEBUG | tree construction |
//! | `warn_log!` | WARN | exhausted retry budgets |

#![allow(unused_macros, unused_imports)]

macro_rules! trace_log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::trace!($($arg)*);
    }};
}

macro_rules! debug_log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::debug!($($arg)*);
    }};
}

macro_rules! warn_log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::warn!($($arg)*);
    }};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
