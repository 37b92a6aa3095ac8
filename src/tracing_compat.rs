//! Logging shim over `tracing`.
//!
//! With the `tracing-integration` feature (the default) this re-exports the
//! `tracing` macros. Without it the same names expand to nothing, so engine
//! code can log unconditionally:
//!
//! ```rust,ignore
//! use sluice::tracing_compat::{debug, trace};
//!
//! trace!(scope = %id, finalizers = 2, "scope closing");
//! debug!(origin = %origin, reason = %reason, "interrupt context fired");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Stand-in for `tracing::Level` when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level.
    TRACE,
    /// Debug level.
    DEBUG,
    /// Info level.
    INFO,
    /// Warn level.
    WARN,
    /// Error level.
    ERROR,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_accept_structured_fields() {
        let scope = "S1";
        trace!(scope = %scope, finalizers = 2, "closing");
        debug!(scope = %scope, "opened");
        warn!(error = %"boom", "finalizer failed");
        let _ = Level::DEBUG;
    }
}
