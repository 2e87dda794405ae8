//! Error types for context operations.
//!
//! Cancellation itself is not an error condition: a context reports its
//! terminal reason through [`CancelKind`](crate::types::CancelKind). The
//! [`Error`] type covers the cases where an operation cannot complete:
//!
//! - **Cancellation**: [`Context::check`](crate::Context::check) converts a
//!   terminal state into an `Err` for `?`-style unwinding
//! - **Timer**: the timer service refused a deadline registration
//! - **Lookup**: a typed value lookup found a payload of another type
//! - **Config**: configuration failed validation
//!
//! # Recovery Classification
//!
//! Every error kind is classified by [`Recoverability`]. Only timer
//! exhaustion is transient; everything else is permanent for the context
//! that produced it.

use core::fmt;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::types::CancelKind;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The context was cancelled.
    Cancelled,
    /// The context's deadline elapsed.
    DeadlineExceeded,

    // === Timer ===
    /// The timer service is at capacity and cannot register another deadline.
    TimerExhausted,
    /// The timer service is not running.
    TimerUnavailable,

    // === Lookup ===
    /// A value was found under the key but has a different type.
    TypeMismatch,

    // === Config ===
    /// Configuration is invalid.
    Config,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => ErrorCategory::Cancellation,
            Self::TimerExhausted | Self::TimerUnavailable => ErrorCategory::Timer,
            Self::TypeMismatch => ErrorCategory::Lookup,
            Self::Config => ErrorCategory::Config,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::TimerExhausted => Recoverability::Transient,
            Self::Cancelled
            | Self::DeadlineExceeded
            | Self::TimerUnavailable
            | Self::TypeMismatch
            | Self::Config => Recoverability::Permanent,
        }
    }
}

impl From<CancelKind> for ErrorKind {
    fn from(kind: CancelKind) -> Self {
        match kind {
            CancelKind::Cancelled => Self::Cancelled,
            CancelKind::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// High-level grouping of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Terminal context states surfaced as errors.
    Cancellation,
    /// Timer service failures.
    Timer,
    /// Value lookup failures.
    Lookup,
    /// Configuration failures.
    Config,
}

/// Whether retrying the failed operation can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
}

/// The main error type for context operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Creates the error matching a terminal context state.
    #[must_use]
    pub const fn from_cancel(kind: CancelKind) -> Self {
        match kind {
            CancelKind::Cancelled => Self::new(ErrorKind::Cancelled),
            CancelKind::DeadlineExceeded => Self::new(ErrorKind::DeadlineExceeded),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message attached to this error, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error represents explicit cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a deadline condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Returns the terminal context reason this error carries, if any.
    #[must_use]
    pub const fn cancel_kind(&self) -> Option<CancelKind> {
        match self.kind {
            ErrorKind::Cancelled => Some(CancelKind::Cancelled),
            ErrorKind::DeadlineExceeded => Some(CancelKind::DeadlineExceeded),
            _ => None,
        }
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<CancelKind> for Error {
    fn from(kind: CancelKind) -> Self {
        Self::from_cancel(kind)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// A specialized Result type for context operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_includes_message() {
        let err = Error::new(ErrorKind::TimerExhausted).with_message("capacity 4 reached");
        assert_eq!(err.to_string(), "TimerExhausted: capacity 4 reached");
        assert_eq!(err.message(), Some("capacity 4 reached"));
    }

    #[test]
    fn cancel_kinds_round_trip_through_error() {
        let err = Error::from(CancelKind::DeadlineExceeded);
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(err.cancel_kind(), Some(CancelKind::DeadlineExceeded));
        assert_eq!(err.kind().category(), ErrorCategory::Cancellation);

        let err = Error::new(ErrorKind::TypeMismatch);
        assert_eq!(err.cancel_kind(), None);
    }

    #[test]
    fn only_timer_exhaustion_is_transient() {
        assert_eq!(
            ErrorKind::TimerExhausted.recoverability(),
            Recoverability::Transient
        );
        assert_eq!(
            ErrorKind::TimerUnavailable.recoverability(),
            Recoverability::Permanent
        );
        assert_eq!(
            ErrorKind::Cancelled.recoverability(),
            Recoverability::Permanent
        );
    }

    #[test]
    fn config_errors_keep_their_source() {
        let err = Error::from(ConfigError::InvalidTimerCapacity);
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.source().is_some());
    }
}
