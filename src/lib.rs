//! Kie-context: hierarchical cancellation contexts with deadlines and
//! request-scoped values.
//!
//! # Overview
//!
//! A [`Context`] is handed down a call tree so that work started on behalf of
//! a request can be stopped as a unit. Each context is either active or done,
//! and once done it stays done for one reason: it was cancelled, or its
//! deadline passed. Deriving a child inherits the parent's cancellation,
//! deadline and values; cancelling a parent reaches every descendant.
//!
//! # Core Guarantees
//!
//! - **Downward only**: cancellation flows from a context to its subtree, never up
//! - **One transition**: the first terminal reason wins and never changes
//! - **No stragglers**: a child derived from a done parent is born done
//! - **Earliest deadline governs**: a child can tighten but never extend its budget
//! - **No leaks**: dropped contexts unregister from their parents and defuse their timers
//!
//! # Module Structure
//!
//! - [`context`]: the context tree, propagation, waiting and value lookup
//! - [`time`]: clocks and timer services that enforce deadlines
//! - [`types`]: identifiers, timestamps and state enums
//! - [`error`]: error types
//! - [`config`]: timer settings and environment overrides
//! - [`tracing_compat`]: logging facade behind the `tracing-integration` feature
//!
//! # Example
//!
//! ```
//! use kie_context::{CancelKind, Context};
//! use std::time::Duration;
//!
//! let request = Context::root().with_timeout(Duration::from_secs(30)).unwrap();
//! let (worker, guard) = request.with_cancel();
//!
//! assert!(worker.check().is_ok());
//! drop(guard);
//! assert_eq!(worker.err(), Some(CancelKind::Cancelled));
//! assert!(!request.is_done());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod context;
pub mod error;
pub(crate) mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, ConfigLoader, ContextConfig, TimerConfig};
pub use context::{
    select_done, CancelOnDrop, Context, ContextSnapshot, Done, DoneRegistration, Key, TypedKey,
};
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use time::{TimerDriver, TimerDriverHandle, TimerService, VirtualClock};
pub use types::{CancelKind, ContextId, ContextState, Time};
