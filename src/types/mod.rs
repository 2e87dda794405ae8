//! Core types shared across the crate.
//!
//! - [`id`]: identifier and time types (`ContextId`, `Time`)
//! - [`cancel`]: terminal reasons and the context state machine

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, ContextState};
pub use id::{ContextId, Time};
