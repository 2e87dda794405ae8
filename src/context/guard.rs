//! Scope-bound cancellation.

use super::node::Context;

/// Cancels its context when dropped.
///
/// Obtained from [`Context::with_cancel`]. Keeping the guard alive for the
/// duration of a scope guarantees that every early return, `?` and panic
/// unwinding through the scope cancels the work started inside it.
///
/// ```
/// use kie_context::Context;
///
/// let parent = Context::root().derive();
/// let worker = {
///     let (scoped, _guard) = parent.with_cancel();
///     scoped.derive()
/// };
/// assert!(worker.is_done());
/// assert!(!parent.is_done());
/// ```
#[must_use = "dropping the guard cancels the context immediately"]
#[derive(Debug)]
pub struct CancelOnDrop {
    ctx: Context,
    armed: bool,
}

impl CancelOnDrop {
    /// Arms a guard over `ctx`.
    pub fn new(ctx: Context) -> Self {
        Self { ctx, armed: true }
    }

    /// Returns the guarded context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Cancels now instead of at drop. Returns what [`Context::cancel`] did.
    pub fn cancel(&self) -> bool {
        self.ctx.cancel()
    }

    /// Releases the guard without cancelling, handing back the context.
    #[must_use]
    pub fn disarm(mut self) -> Context {
        self.armed = false;
        self.ctx.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.ctx.cancel();
        }
    }
}

impl Context {
    /// Derives a child together with a guard that cancels it on drop.
    pub fn with_cancel(&self) -> (Self, CancelOnDrop) {
        let child = self.derive();
        let guard = CancelOnDrop::new(child.clone());
        (child, guard)
    }
}
