//! The context node and derivation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, OnceLock, Weak};
use std::task::Waker;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::lookup::ValueEntry;
use crate::error::Result;
use crate::sync::WaiterSlab;
use crate::time::{TimerDriverHandle, TimerHandle};
use crate::tracing_compat::trace;
use crate::types::{CancelKind, ContextId, ContextState, Time};

pub(super) type DoneCallback = Box<dyn FnOnce(CancelKind) + Send + 'static>;

static ROOT: OnceLock<Context> = OnceLock::new();

/// A node in the context tree.
///
/// A `Context` is a cheap, cloneable handle. Clones share one node: cancelling
/// through any clone cancels them all. A node holds its parent strongly and
/// its children only weakly, so an abandoned branch is reclaimed as soon as
/// its last handle is dropped.
///
/// # Example
///
/// ```
/// use kie_context::{CancelKind, Context};
///
/// let request = Context::root().derive();
/// let with_user = request.with_value("user", String::from("ada"));
/// let worker = with_user.derive();
///
/// assert_eq!(
///     worker.value::<String>("user").unwrap().map(String::as_str),
///     Some("ada")
/// );
///
/// request.cancel();
/// assert_eq!(worker.err(), Some(CancelKind::Cancelled));
/// ```
#[derive(Clone)]
pub struct Context {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) id: ContextId,
    pub(super) parent: Option<Context>,
    /// Deadline declared on this node.
    pub(super) own_deadline: Option<Time>,
    /// Earliest deadline along the chain to the root.
    pub(super) deadline: Option<Time>,
    pub(super) entry: Option<ValueEntry>,
    pub(super) timer: TimerDriverHandle,
    pub(super) state: AtomicU8,
    pub(super) shared: Mutex<Shared>,
    pub(super) cvar: Condvar,
}

/// Mutable bookkeeping, guarded by `Inner::shared`.
#[derive(Default)]
pub(super) struct Shared {
    pub(super) children: HashMap<ContextId, Weak<Inner>>,
    pub(super) wakers: WaiterSlab<Waker>,
    pub(super) listeners: WaiterSlab<DoneCallback>,
    pub(super) timer: Option<TimerHandle>,
    pub(super) cancelled_at: Option<Time>,
}

impl Inner {
    fn new(
        parent: Option<Context>,
        own_deadline: Option<Time>,
        entry: Option<ValueEntry>,
        timer: TimerDriverHandle,
    ) -> Self {
        let inherited = parent.as_ref().and_then(|p| p.inner.deadline);
        Self {
            id: ContextId::next(),
            parent,
            own_deadline,
            deadline: earliest(inherited, own_deadline),
            entry,
            timer,
            state: AtomicU8::new(ContextState::ACTIVE),
            shared: Mutex::new(Shared::default()),
            cvar: Condvar::new(),
        }
    }
}

impl Inner {
    /// Defuses the timer, unregisters from the parent and hands the parent
    /// link back to the caller.
    fn release(&mut self) -> Option<Context> {
        if let Some(handle) = self.shared.get_mut().timer.take() {
            self.timer.cancel(handle);
        }
        let parent = self.parent.take()?;
        let entry = parent.inner.shared.lock().children.remove(&self.id);
        drop(entry);
        Some(parent)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Ancestors whose last handle was ours are freed here one at a time,
        // so dropping a long chain does not recurse.
        let mut next = self.release();
        while let Some(ctx) = next {
            next = Arc::into_inner(ctx.inner).and_then(|mut inner| inner.release());
        }
    }
}

impl Context {
    /// Returns the process-wide root context.
    ///
    /// The root never becomes done. Its deadlines are enforced by the shared
    /// wall-clock timer thread (see [`TimerDriverHandle::global`]).
    #[must_use]
    pub fn root() -> Self {
        ROOT.get_or_init(|| Self::new_root(TimerDriverHandle::global()))
            .clone()
    }

    /// Creates an independent root bound to the given timer service.
    ///
    /// Every context derived from it uses `timer` for its clock and deadlines.
    #[must_use]
    pub fn new_root(timer: TimerDriverHandle) -> Self {
        Self {
            inner: Arc::new(Inner::new(None, None, None, timer)),
        }
    }

    /// Creates an active child with no deadline or value of its own.
    ///
    /// A child of a context that is already done is born done, with the same
    /// reason.
    #[must_use]
    pub fn derive(&self) -> Self {
        self.attach(None, None)
    }

    /// Creates a child that is cancelled with [`CancelKind::DeadlineExceeded`]
    /// once `deadline` passes on the timer service's clock.
    ///
    /// A deadline at or before the current time yields a child that is
    /// already done. A deadline later than an inherited one is recorded but
    /// the inherited one still governs.
    ///
    /// # Errors
    ///
    /// Fails when the timer service cannot accept another timer
    /// (`TimerExhausted`) or is not running (`TimerUnavailable`).
    pub fn with_deadline(&self, deadline: Time) -> Result<Self> {
        let child = self.attach(Some(deadline), None);
        if child.load_state().is_terminal() {
            return Ok(child);
        }
        if deadline <= child.now() {
            child.transition(CancelKind::DeadlineExceeded);
            return Ok(child);
        }
        if self.inner.deadline.map_or(true, |inherited| deadline < inherited) {
            child.arm_deadline(deadline)?;
        }
        Ok(child)
    }

    /// Creates a child whose deadline is `timeout` from now.
    ///
    /// # Errors
    ///
    /// Same as [`with_deadline`](Self::with_deadline).
    pub fn with_timeout(&self, timeout: Duration) -> Result<Self> {
        self.with_deadline(self.now() + timeout)
    }

    /// Returns this context's identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns the parent context, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Returns the parent's identifier, or `None` for a root.
    #[must_use]
    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent().map(Self::id)
    }

    /// Returns true for a context with no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Returns the effective deadline: the earliest along the chain to the root.
    #[must_use]
    pub fn deadline(&self) -> Option<Time> {
        self.inner.deadline
    }

    /// Returns the time left until the effective deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.remaining_from(self.now()))
    }

    /// Returns the current time on this context's timer service.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.timer.now()
    }

    /// Returns the timer service this context is bound to.
    #[must_use]
    pub fn timer(&self) -> &TimerDriverHandle {
        &self.inner.timer
    }

    /// Returns true if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Builds a child node and registers it with this one, or makes it done
    /// right away when this node already is.
    pub(super) fn attach(&self, own_deadline: Option<Time>, entry: Option<ValueEntry>) -> Self {
        let child = Self {
            inner: Arc::new(Inner::new(
                Some(self.clone()),
                own_deadline,
                entry,
                self.inner.timer.clone(),
            )),
        };

        let inherited = {
            let mut shared = self.inner.shared.lock();
            let kind = self.load_state().cancel_kind();
            if kind.is_none() {
                shared
                    .children
                    .insert(child.inner.id, Arc::downgrade(&child.inner));
            }
            kind
        };

        if let Some(kind) = inherited {
            child.transition(kind);
        }
        trace!(
            context_id = %child.inner.id,
            parent_id = %self.inner.id,
            deadline = ?child.inner.deadline,
            "context derived"
        );
        child
    }

    fn arm_deadline(&self, deadline: Time) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.timer.schedule(
            deadline,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Context { inner }.transition(CancelKind::DeadlineExceeded);
                }
            }),
        )?;

        let mut shared = self.inner.shared.lock();
        if self.load_state().is_terminal() {
            drop(shared);
            self.inner.timer.cancel(handle);
        } else {
            shared.timer = Some(handle);
            trace!(context_id = %self.inner.id, deadline = %deadline, "deadline armed");
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("parent", &self.parent_id())
            .field("state", &self.load_state())
            .field("deadline", &self.inner.deadline)
            .field("key", &self.inner.entry.as_ref().map(ValueEntry::key))
            .finish()
    }
}

fn earliest(a: Option<Time>, b: Option<Time>) -> Option<Time> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
