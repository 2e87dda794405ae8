//! Ordered queue of pending one-shot timers.
//!
//! Shared by the manually driven [`TimerDriver`](super::TimerDriver) and the
//! background [`TimerThread`](super::TimerThread). Entries are keyed by
//! `(deadline, id)` so timers with equal deadlines fire in registration order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::warn;
use crate::types::Time;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
}

impl TimerHandle {
    /// Returns the timer identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) struct TimerQueue {
    entries: BTreeMap<(Time, u64), TimerCallback>,
    index: HashMap<u64, Time>,
    next_id: u64,
    capacity: usize,
}

impl TimerQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 0,
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Time, callback: TimerCallback) -> Result<TimerHandle> {
        if self.entries.len() >= self.capacity {
            return Err(Error::new(ErrorKind::TimerExhausted).with_message(format!(
                "{} timers pending, capacity {}",
                self.entries.len(),
                self.capacity
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((deadline, id), callback);
        self.index.insert(id, deadline);
        Ok(TimerHandle { id })
    }

    /// Removes a pending timer, handing its callback back so the caller can
    /// drop it outside any lock.
    pub(crate) fn remove(&mut self, handle: TimerHandle) -> Option<TimerCallback> {
        let deadline = self.index.remove(&handle.id)?;
        self.entries.remove(&(deadline, handle.id))
    }

    pub(crate) fn next_deadline(&self) -> Option<Time> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every callback whose deadline is at or before `now`.
    pub(crate) fn collect_expired(&mut self, now: Time) -> Vec<TimerCallback> {
        if self.next_deadline().map_or(true, |next| next > now) {
            return Vec::new();
        }
        let later = self.entries.split_off(&(now.saturating_add_nanos(1), 0));
        let expired = std::mem::replace(&mut self.entries, later);
        expired
            .into_iter()
            .map(|((_, id), callback)| {
                self.index.remove(&id);
                callback
            })
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<TimerCallback> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.entries.len())
            .field("next_deadline", &self.next_deadline())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Runs expired callbacks in order. A panicking callback is logged and does
/// not prevent the remaining ones from running.
pub(crate) fn fire_all(callbacks: Vec<TimerCallback>) -> usize {
    let fired = callbacks.len();
    for callback in callbacks {
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            warn!("timer callback panicked");
        }
    }
    fired
}
