//! Terminal transitions and their propagation through the tree.
//!
//! A node leaves `Active` exactly once, through a compare-and-swap taken
//! under the node's lock. The same lock guards child registration, so a
//! child either lands in the registry before the transition drains it or
//! observes the terminal state and is born done. Propagation walks the
//! subtree with an explicit work list; every descendant reached receives
//! the same [`CancelKind`] as the node that started it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::node::{Context, DoneCallback, Inner};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, warn};
use crate::types::{CancelKind, ContextState, Time};

impl Context {
    /// Cancels this context and every descendant with
    /// [`CancelKind::Cancelled`].
    ///
    /// Returns true if this call moved the context out of `Active`. Cancelling
    /// a context that is already done changes nothing, including its reason.
    /// Roots cannot be cancelled; the call is ignored and returns false.
    pub fn cancel(&self) -> bool {
        if self.is_root() {
            warn!(context_id = %self.id(), "ignoring cancel on a root context");
            return false;
        }
        self.transition(CancelKind::Cancelled)
    }

    /// Returns the current lifecycle state.
    ///
    /// An effective deadline that has already passed on the clock is
    /// reported as `DeadlineExceeded` even if its timer has not fired yet.
    #[must_use]
    pub fn state(&self) -> ContextState {
        let state = self.load_state();
        if state.is_terminal() {
            return state;
        }
        match self.inner.deadline {
            Some(deadline) if self.inner.timer.now() >= deadline => {
                self.expire(deadline);
                self.load_state()
            }
            _ => state,
        }
    }

    /// Returns true once the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns why the context is done, or `None` while it is active.
    #[must_use]
    pub fn err(&self) -> Option<CancelKind> {
        self.state().cancel_kind()
    }

    /// Returns `Ok(())` while active, or the matching error once done.
    ///
    /// Meant for `?` at the checkpoints of long-running work.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Cancelled` or `ErrorKind::DeadlineExceeded`.
    pub fn check(&self) -> Result<()> {
        self.err().map_or(Ok(()), |kind| Err(Error::from_cancel(kind)))
    }

    /// Returns when the context became done, on its timer service's clock.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<Time> {
        let _ = self.state();
        self.inner.shared.lock().cancelled_at
    }

    /// Returns how many live children are registered with this context.
    ///
    /// Done contexts hold no registrations.
    #[must_use]
    pub fn registered_children(&self) -> usize {
        self.inner.shared.lock().children.len()
    }

    pub(super) fn load_state(&self) -> ContextState {
        ContextState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Moves this context and its subtree to the terminal state for `kind`.
    ///
    /// Returns false if the context was already done.
    #[cfg_attr(
        not(feature = "tracing-integration"),
        allow(unused_variables, unused_assignments)
    )]
    pub(super) fn transition(&self, kind: CancelKind) -> bool {
        let mut listeners = Vec::new();
        let mut pending = Vec::new();
        if !self.inner.mark(kind, &mut pending, &mut listeners) {
            return false;
        }

        // Descendants were drained from their parents by `mark`; only the
        // starting node is still registered above.
        if let Some(parent) = self.parent() {
            let entry = parent.inner.shared.lock().children.remove(&self.inner.id);
            drop(entry);
        }

        let mut descendants = 0_usize;
        while let Some(node) = pending.pop() {
            if node.mark(kind, &mut pending, &mut listeners) {
                descendants += 1;
            }
        }
        debug!(
            context_id = %self.inner.id,
            kind = %kind,
            descendants,
            listeners = listeners.len(),
            "context done"
        );

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(kind))).is_err() {
                warn!(context_id = %self.inner.id, "done callback panicked");
            }
        }
        true
    }

    /// Expires the node that owns `deadline`.
    ///
    /// The owner is the topmost node on the chain that declared it; expiring
    /// it reaches this context and every other node governed by it.
    fn expire(&self, deadline: Time) {
        let mut owner = self;
        let mut node = self;
        while let Some(parent) = node.parent() {
            if parent.inner.own_deadline == Some(deadline) {
                owner = parent;
            }
            node = parent;
        }
        owner.transition(CancelKind::DeadlineExceeded);
    }
}

impl Inner {
    fn mark(
        &self,
        kind: CancelKind,
        pending: &mut Vec<Arc<Self>>,
        listeners: &mut Vec<DoneCallback>,
    ) -> bool {
        if self.state.load(Ordering::Acquire) != ContextState::ACTIVE {
            return false;
        }

        let now = self.timer.now();
        let (children, wakers, timer) = {
            let mut shared = self.shared.lock();
            if self
                .state
                .compare_exchange(
                    ContextState::ACTIVE,
                    kind.state().to_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return false;
            }
            shared.cancelled_at = Some(now);
            let children: SmallVec<[Weak<Self>; 8]> =
                shared.children.drain().map(|(_, child)| child).collect();
            listeners.extend(shared.listeners.drain());
            let wakers = shared.wakers.drain();
            let timer = shared.timer.take();
            self.cvar.notify_all();
            (children, wakers, timer)
        };

        if let Some(handle) = timer {
            self.timer.cancel(handle);
        }
        for waker in wakers {
            waker.wake();
        }
        pending.extend(children.iter().filter_map(Weak::upgrade));
        true
    }
}
