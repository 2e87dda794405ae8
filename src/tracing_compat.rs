//! Logging facade.
//!
//! With the `tracing-integration` feature the macros below are the ones from
//! the `tracing` crate. Without it they expand to nothing, so a build that
//! does not want structured logging pays nothing for it.
//!
//! ```rust,ignore
//! use crate::tracing_compat::{debug, trace};
//!
//! trace!(context_id = %id, "context derived");
//! debug!(kind = %kind, descendants, "context done");
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

/// Stand-in for `tracing::Level` when logging is compiled out.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level;

#[cfg(not(feature = "tracing-integration"))]
impl Level {
    /// Trace level.
    pub const TRACE: Self = Self;
    /// Debug level.
    pub const DEBUG: Self = Self;
    /// Info level.
    pub const INFO: Self = Self;
    /// Warn level.
    pub const WARN: Self = Self;
    /// Error level.
    pub const ERROR: Self = Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::types::{CancelKind, ContextId};

    #[test]
    fn log_macros_accept_context_fields() {
        init_test_logging();
        crate::test_phase!("log_macros_accept_context_fields");
        let id = ContextId::new_for_test(3);
        let kind = CancelKind::Cancelled;

        trace!(context_id = %id, "context derived");
        debug!(context_id = %id, kind = %kind, descendants = 2_usize, "context done");
        info!(thread = "kie-context-timer", "timer thread started");
        warn!(context_id = %id, "ignoring cancel on a root context");
        error!("unreachable in practice");
        crate::test_complete!("log_macros_accept_context_fields");
    }

    #[test]
    fn levels_are_available() {
        init_test_logging();
        let levels = [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR];
        crate::assert_with_log!(levels.len() == 5, "five levels", 5, levels.len());
    }
}
