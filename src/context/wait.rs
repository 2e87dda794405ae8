//! Waiting for a context to become done.
//!
//! Blocking waiters park on the node's condition variable. Async waiters
//! register a waker in the node's slab; completion callbacks register a
//! boxed closure in a second slab. A terminal transition drains both under
//! the node's lock and then wakes or runs them outside it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::node::{Context, Inner};
use crate::tracing_compat::trace;
use crate::types::CancelKind;

impl Context {
    /// Blocks the calling thread until the context is done.
    ///
    /// Returns at once if it already is. A deadline that passes while
    /// waiting is observed even when its timer is slow to fire.
    #[must_use = "the returned kind says why the context finished"]
    pub fn wait(&self) -> CancelKind {
        loop {
            if let Some(kind) = self.block_until(None) {
                return kind;
            }
        }
    }

    /// Blocks until the context is done or `timeout` elapses.
    ///
    /// Returns `None` on timeout. The timeout is measured on the monotonic
    /// system clock, independently of the context's timer service.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelKind> {
        match Instant::now().checked_add(timeout) {
            Some(limit) => self.block_until(Some(limit)),
            None => Some(self.wait()),
        }
    }

    /// Returns a future that resolves once the context is done.
    ///
    /// ```
    /// use kie_context::{CancelKind, Context};
    ///
    /// let ctx = Context::root().derive();
    /// ctx.cancel();
    /// let kind = futures::executor::block_on(ctx.done());
    /// assert_eq!(kind, CancelKind::Cancelled);
    /// ```
    pub fn done(&self) -> Done<'_> {
        Done {
            ctx: self,
            slot: None,
        }
    }

    /// Runs `callback` once, when the context becomes done.
    ///
    /// If the context is already done the callback runs immediately on the
    /// calling thread. Otherwise it runs on whichever thread performs the
    /// transition, after the context's lock has been released. Dropping the
    /// returned registration before then unregisters the callback.
    pub fn on_done<F>(&self, callback: F) -> DoneRegistration
    where
        F: FnOnce(CancelKind) + Send + 'static,
    {
        if let Some(kind) = self.err() {
            callback(kind);
            return DoneRegistration::fired();
        }

        let mut shared = self.inner.shared.lock();
        if let Some(kind) = self.load_state().cancel_kind() {
            drop(shared);
            callback(kind);
            return DoneRegistration::fired();
        }
        let slot = shared.listeners.insert(Box::new(callback));
        drop(shared);

        trace!(context_id = %self.id(), slot, "done callback registered");
        DoneRegistration {
            ctx: Arc::downgrade(&self.inner),
            slot: Some(slot),
        }
    }

    /// Waits until the context is done or `limit` passes; `None` on timeout.
    fn block_until(&self, limit: Option<Instant>) -> Option<CancelKind> {
        loop {
            if let Some(kind) = self.err() {
                return Some(kind);
            }

            let mut shared = self.inner.shared.lock();
            if let Some(kind) = self.load_state().cancel_kind() {
                return Some(kind);
            }

            let now = Instant::now();
            let until_limit = match limit {
                Some(limit) if now >= limit => return None,
                Some(limit) => Some(limit - now),
                None => None,
            };
            let until_deadline = self.remaining();
            match min_duration(until_limit, until_deadline) {
                Some(park) => {
                    let _ = self.inner.cvar.wait_for(&mut shared, park);
                }
                None => self.inner.cvar.wait(&mut shared),
            }
        }
    }
}

/// Waits on several contexts at once.
///
/// Returns the index of the first context to become done, or `None` if
/// `timeout` elapses first. When several are already done on entry the
/// lowest index wins. An empty slice returns `None` immediately.
#[must_use]
pub fn select_done(contexts: &[&Context], timeout: Option<Duration>) -> Option<usize> {
    if contexts.is_empty() {
        return None;
    }

    let signal = Arc::new(Signal::default());
    let registrations: Vec<DoneRegistration> = contexts
        .iter()
        .enumerate()
        .map(|(index, ctx)| {
            let signal = Arc::clone(&signal);
            ctx.on_done(move |_| signal.fire(index))
        })
        .collect();

    let limit = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
    let winner = {
        let mut winner = signal.winner.lock();
        loop {
            if winner.is_some() {
                break *winner;
            }
            match limit {
                Some(limit) => {
                    if signal.cvar.wait_until(&mut winner, limit).timed_out() {
                        break *winner;
                    }
                }
                None => signal.cvar.wait(&mut winner),
            }
        }
    };
    drop(registrations);
    winner
}

#[derive(Default)]
struct Signal {
    winner: Mutex<Option<usize>>,
    cvar: Condvar,
}

impl Signal {
    fn fire(&self, index: usize) {
        let mut winner = self.winner.lock();
        if winner.is_none() {
            *winner = Some(index);
            self.cvar.notify_all();
        }
    }
}

/// Future returned by [`Context::done`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Done<'a> {
    ctx: &'a Context,
    slot: Option<usize>,
}

impl Future for Done<'_> {
    type Output = CancelKind;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<CancelKind> {
        let ctx = self.ctx;
        if let Some(kind) = ctx.err() {
            self.slot = None;
            return Poll::Ready(kind);
        }

        let mut shared = ctx.inner.shared.lock();
        if let Some(kind) = ctx.load_state().cancel_kind() {
            drop(shared);
            self.slot = None;
            return Poll::Ready(kind);
        }
        let slot = self.slot;
        match slot {
            Some(index) if shared.wakers.replace(index, cx.waker().clone()) => {}
            _ => self.slot = Some(shared.wakers.insert(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl Drop for Done<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.slot.take() {
            let waker = self.ctx.inner.shared.lock().wakers.remove(index);
            drop(waker);
        }
    }
}

/// Keeps a callback registered through [`Context::on_done`].
///
/// Dropping it before the context is done unregisters the callback.
#[must_use = "dropping the registration unregisters the callback"]
#[derive(Debug)]
pub struct DoneRegistration {
    ctx: Weak<Inner>,
    slot: Option<usize>,
}

impl DoneRegistration {
    fn fired() -> Self {
        Self {
            ctx: Weak::new(),
            slot: None,
        }
    }

    /// Returns true while the callback is registered and has not run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
            && self
                .ctx
                .upgrade()
                .is_some_and(|inner| Context { inner }.load_state().cancel_kind().is_none())
    }

    /// Leaves the callback registered for as long as the context lives.
    pub fn detach(mut self) {
        self.slot = None;
    }
}

impl Drop for DoneRegistration {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if let Some(inner) = self.ctx.upgrade() {
            let callback = inner.shared.lock().listeners.remove(slot);
            drop(callback);
        }
    }
}

fn min_duration(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
