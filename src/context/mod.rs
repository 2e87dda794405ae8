//! Hierarchical cancellation contexts.
//!
//! A [`Context`] carries three things down a call tree: a cancellation
//! signal, an optional deadline, and request-scoped values. Contexts form a
//! tree rooted at [`Context::root`] (or a root of your own from
//! [`Context::new_root`]); each derived child inherits everything from its
//! parent and may add one of its own.
//!
//! # Propagation
//!
//! Cancelling a context cancels its whole subtree before `cancel` returns.
//! A deadline that elapses does the same with
//! [`CancelKind::DeadlineExceeded`](crate::types::CancelKind). A context
//! leaves `Active` once and never again; later cancels and deadlines change
//! nothing. Parents are never affected by their children.
//!
//! # Waiting
//!
//! - [`Context::wait`] / [`Context::wait_timeout`] block a thread
//! - [`Context::done`] returns a future
//! - [`Context::on_done`] registers a callback
//! - [`select_done`] waits for the first of several contexts
//!
//! # Lifetime
//!
//! A child keeps its parent alive. A parent only keeps weak registrations of
//! its children, which are removed when the child is dropped, so contexts
//! that go out of scope are reclaimed without being cancelled.

mod guard;
mod lookup;
mod node;
mod propagate;
mod snapshot;
mod wait;

pub use guard::CancelOnDrop;
pub use lookup::{Key, TypedKey};
pub use node::Context;
pub use snapshot::ContextSnapshot;
pub use wait::{select_done, Done, DoneRegistration};
