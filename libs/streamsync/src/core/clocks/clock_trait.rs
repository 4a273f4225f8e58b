// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock trait - monotonic time reference with cancellable single-shot waits
//!
//! A clock hands out [`ClockId`]s, one per waiting party. The party re-arms
//! the same id for every wait with [`Clock::reinit`], and any thread may
//! cancel the outstanding wait with [`Clock::unschedule`].
//!
//! ## Usage in Sinks
//!
//! ```rust,ignore
//! let id = clock.new_single_shot_id(base_time + running_time);
//! match clock.wait(&id).status {
//!     ClockReturn::Ok | ClockReturn::Early => render(buffer),
//!     ClockReturn::Unscheduled => { /* state changed, re-check */ }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::core::time::{ClockTime, ClockTimeDiff};

static NEXT_CLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of a clock wait. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReturn {
    /// The target was reached while waiting.
    Ok,
    /// The target had already passed when the wait was issued.
    Early,
    /// The wait was cancelled from another thread.
    Unscheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockWait {
    pub status: ClockReturn,
    /// `target - completion_time` in nanoseconds. Negative when late.
    pub jitter: ClockTimeDiff,
}

impl ClockWait {
    pub fn unscheduled() -> Self {
        Self {
            status: ClockReturn::Unscheduled,
            jitter: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EntryState {
    pub target: ClockTime,
    pub unscheduled: bool,
}

#[derive(Debug)]
pub(crate) struct ClockEntry {
    pub id: u64,
    pub state: Mutex<EntryState>,
    pub cond: Condvar,
}

/// Handle to one registered wait request.
///
/// Cloning shares the same registration.
#[derive(Clone)]
pub struct ClockId(pub(crate) Arc<ClockEntry>);

impl ClockId {
    pub(crate) fn new(target: ClockTime) -> Self {
        ClockId(Arc::new(ClockEntry {
            id: NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(EntryState {
                target,
                unscheduled: false,
            }),
            cond: Condvar::new(),
        }))
    }

    pub fn target(&self) -> ClockTime {
        self.0.state.lock().target
    }

    pub fn is_unscheduled(&self) -> bool {
        self.0.state.lock().unscheduled
    }

    pub(crate) fn raw_id(&self) -> u64 {
        self.0.id
    }

    /// Re-arm with a new target, clearing a previous cancellation.
    pub(crate) fn rearm(&self, target: ClockTime) {
        let mut state = self.0.state.lock();
        state.target = target;
        state.unscheduled = false;
    }

    /// Mark cancelled and wake a waiter blocked on this entry.
    pub(crate) fn cancel(&self) {
        let mut state = self.0.state.lock();
        state.unscheduled = true;
        self.0.cond.notify_all();
    }
}

impl PartialEq for ClockId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClockId {}

impl fmt::Debug for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("ClockId")
            .field("id", &self.0.id)
            .field("target", &state.target)
            .field("unscheduled", &state.unscheduled)
            .finish()
    }
}

/// Monotonic time source shared by every element of a pipeline.
///
/// ## Implementations
///
/// - `SystemClock`: monotonic host time, real blocking waits
/// - `TestClock`: manually advanced, for deterministic tests
pub trait Clock: Send + Sync {
    /// Current time. Never decreases.
    fn now(&self) -> ClockTime;

    /// Human-readable clock description, used for logging.
    fn description(&self) -> &str;

    /// Register a single-shot wait request for `target`.
    fn new_single_shot_id(&self, target: ClockTime) -> ClockId {
        ClockId::new(target)
    }

    /// Reuse `id` for a new target. The same registration object is mutated.
    fn reinit(&self, id: &ClockId, target: ClockTime) {
        id.rearm(target);
    }

    /// Block until the clock reaches the target of `id` or the wait is
    /// unscheduled. Returns immediately with `Early` if the target has
    /// already passed, and with `Unscheduled` if `id` was cancelled before
    /// the call.
    fn wait(&self, id: &ClockId) -> ClockWait;

    /// Cancel the outstanding wait on `id`. Safe to call from any thread and
    /// never blocks on the waiter.
    fn unschedule(&self, id: &ClockId);

    /// One-off wait on a fresh registration.
    fn wait_until(&self, target: ClockTime) -> ClockWait {
        let id = self.new_single_shot_id(target);
        self.wait(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_clears_cancellation() {
        let id = ClockId::new(ClockTime::from_seconds(1));
        id.cancel();
        assert!(id.is_unscheduled());

        id.rearm(ClockTime::from_seconds(2));
        assert!(!id.is_unscheduled());
        assert_eq!(id.target(), ClockTime::from_seconds(2));
    }

    #[test]
    fn test_clones_share_registration() {
        let id = ClockId::new(ClockTime::ZERO);
        let other = id.clone();
        assert_eq!(id, other);
        assert_eq!(id.raw_id(), other.raw_id());
        assert_ne!(id, ClockId::new(ClockTime::ZERO));
    }
}
