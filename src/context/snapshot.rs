//! Serializable view of a context, for handing work across a boundary.
//!
//! Clocks of two timer services share no epoch, so a snapshot records the
//! time left until the deadline rather than the deadline itself. Values are
//! not captured.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::node::Context;
use crate::error::Result;
use crate::types::ContextState;

/// Lifecycle state and remaining budget of a context at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// State when the snapshot was taken.
    pub state: ContextState,
    /// Nanoseconds left until the effective deadline, if there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_nanos: Option<u64>,
}

impl ContextSnapshot {
    /// Returns the remaining budget as a duration.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_nanos.map(Duration::from_nanos)
    }
}

impl Context {
    /// Captures the current state and remaining budget.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state();
        let remaining_nanos = self
            .remaining()
            .map(|left| u64::try_from(left.as_nanos()).unwrap_or(u64::MAX));
        ContextSnapshot {
            state,
            remaining_nanos,
        }
    }

    /// Derives a child of `self` that mirrors `snapshot`.
    ///
    /// The child's deadline is the snapshot's remaining budget measured from
    /// this context's clock, and a terminal snapshot yields a child that is
    /// already done for the same reason.
    ///
    /// # Errors
    ///
    /// Fails like [`with_deadline`](Self::with_deadline) when the deadline
    /// timer cannot be armed.
    pub fn restore(&self, snapshot: &ContextSnapshot) -> Result<Self> {
        let deadline = snapshot.remaining().map(|left| self.now() + left);
        if let Some(kind) = snapshot.state.cancel_kind() {
            let child = self.attach(deadline, None);
            child.transition(kind);
            return Ok(child);
        }
        match deadline {
            Some(deadline) => self.with_deadline(deadline),
            None => Ok(self.derive()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::virtual_root;
    use crate::types::{CancelKind, Time};

    #[test]
    fn snapshot_records_remaining_budget() {
        let (root, driver) = virtual_root();
        let ctx = root.with_timeout(Duration::from_millis(100)).unwrap();
        driver.advance(Duration::from_millis(40));
        let snap = ctx.snapshot();
        assert_eq!(snap.state, ContextState::Active);
        assert_eq!(snap.remaining(), Some(Duration::from_millis(60)));
    }

    #[test]
    fn restore_rebases_on_the_local_clock() {
        let (remote_root, remote_driver) = virtual_root();
        let remote = remote_root.with_timeout(Duration::from_millis(100)).unwrap();
        remote_driver.advance(Duration::from_millis(25));

        let (local_root, local_driver) = virtual_root();
        local_driver.advance(Duration::from_secs(10));
        let local = local_root.restore(&remote.snapshot()).unwrap();
        assert_eq!(local.deadline(), Some(Time::from_millis(10_075)));

        local_driver.advance(Duration::from_millis(75));
        assert_eq!(local.err(), Some(CancelKind::DeadlineExceeded));
    }

    #[test]
    fn terminal_snapshots_restore_done() {
        let (root, _driver) = virtual_root();
        let ctx = root.derive();
        ctx.cancel();
        let restored = root.restore(&ctx.snapshot()).unwrap();
        assert_eq!(restored.err(), Some(CancelKind::Cancelled));
    }

    #[test]
    fn exhausted_budget_keeps_its_reason() {
        let (root, driver) = virtual_root();
        let ctx = root.with_timeout(Duration::from_millis(5)).unwrap();
        driver.advance(Duration::from_millis(5));
        let snap = ctx.snapshot();
        assert_eq!(snap.state, ContextState::DeadlineExceeded);
        assert_eq!(snap.remaining(), Some(Duration::ZERO));
        let restored = root.restore(&snap).unwrap();
        assert_eq!(restored.err(), Some(CancelKind::DeadlineExceeded));
    }

    #[test]
    fn snapshot_json_shape() {
        let (root, _driver) = virtual_root();
        let json = serde_json::to_value(root.derive().snapshot()).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "active" }));

        let parsed: ContextSnapshot =
            serde_json::from_str(r#"{"state":"cancelled","remaining_nanos":5}"#).unwrap();
        assert_eq!(parsed.state, ContextState::Cancelled);
        assert_eq!(parsed.remaining(), Some(Duration::from_nanos(5)));
    }
}
