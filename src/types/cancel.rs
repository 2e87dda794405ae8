//! Cancellation kind and context state types.
//!
//! A context is either still running or has reached one of two terminal
//! states. The terminal reason is reported as a [`CancelKind`] and never
//! changes once set.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelKind {
    /// An explicit cancellation on this context or an ancestor.
    Cancelled,
    /// A deadline on this context or an ancestor elapsed first.
    DeadlineExceeded,
}

impl CancelKind {
    /// Returns true for deadline expiry.
    #[must_use]
    pub const fn is_deadline(self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// The terminal state this kind leads to.
    #[must_use]
    pub const fn state(self) -> ContextState {
        match self {
            Self::Cancelled => ContextState::Cancelled,
            Self::DeadlineExceeded => ContextState::DeadlineExceeded,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// The cancellation state of a context.
///
/// Transitions only run `Active -> Cancelled` or `Active -> DeadlineExceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Not yet cancelled.
    #[default]
    Active,
    /// Cancelled explicitly.
    Cancelled,
    /// Stopped by a deadline.
    DeadlineExceeded,
}

impl ContextState {
    pub(crate) const ACTIVE: u8 = 0;
    pub(crate) const CANCELLED: u8 = 1;
    pub(crate) const DEADLINE_EXCEEDED: u8 = 2;

    /// Returns true once the state can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// The terminal reason, or `None` while active.
    #[must_use]
    pub const fn cancel_kind(self) -> Option<CancelKind> {
        match self {
            Self::Active => None,
            Self::Cancelled => Some(CancelKind::Cancelled),
            Self::DeadlineExceeded => Some(CancelKind::DeadlineExceeded),
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Active => Self::ACTIVE,
            Self::Cancelled => Self::CANCELLED,
            Self::DeadlineExceeded => Self::DEADLINE_EXCEEDED,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            Self::CANCELLED => Self::Cancelled,
            Self::DEADLINE_EXCEEDED => Self::DeadlineExceeded,
            _ => Self::Active,
        }
    }
}

impl From<CancelKind> for ContextState {
    fn from(kind: CancelKind) -> Self {
        kind.state()
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}
