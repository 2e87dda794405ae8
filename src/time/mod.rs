//! Time sources and timer services for deadline enforcement.
//!
//! - [`TimeSource`]: wall clock ([`WallClock`]) or virtual ([`VirtualClock`])
//! - [`TimerService`]: schedules one-shot callbacks at deadlines
//! - [`TimerDriver`]: a service fired manually, for deterministic tests
//! - [`TimerThread`]: a background wall-clock service
//! - [`TimerDriverHandle`]: the cloneable handle contexts hold
//!
//! # Virtual vs Wall Time
//!
//! A context never reads the system clock directly; it asks the timer
//! service it was rooted on. Tests root contexts on a
//! `TimerDriver<VirtualClock>` and move time forward explicitly.

mod driver;
mod queue;
mod thread;

pub use driver::{
    TimeSource, TimerDriver, TimerDriverHandle, TimerService, VirtualClock, WallClock,
};
pub use queue::{TimerCallback, TimerHandle};
pub use thread::TimerThread;
