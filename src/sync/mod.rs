//! Internal synchronization helpers.
//!
//! - [`slab`]: slot storage for wakers and completion callbacks registered
//!   on a context

pub(crate) mod slab;

pub(crate) use slab::WaiterSlab;
