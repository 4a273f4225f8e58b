// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Manually driven clock for deterministic tests.
//!
//! Time only moves when [`TestClock::set_time`] or [`TestClock::advance`] is
//! called. Waiters register themselves as pending so a test can block until
//! the streaming thread has reached its clock wait before moving time.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Clock, ClockId, ClockReturn, ClockWait};
use crate::core::time::ClockTime;

struct TestClockState {
    now: ClockTime,
    pending: Vec<(u64, ClockTime)>,
}

pub struct TestClock {
    state: Mutex<TestClockState>,
    changed: Condvar,
    description: String,
}

impl TestClock {
    pub fn new() -> Self {
        Self::starting_at(ClockTime::ZERO)
    }

    pub fn starting_at(now: ClockTime) -> Self {
        Self {
            state: Mutex::new(TestClockState {
                now,
                pending: Vec::new(),
            }),
            changed: Condvar::new(),
            description: "Test Clock".to_string(),
        }
    }

    /// Jump to `time`. Moving backwards is ignored.
    pub fn set_time(&self, time: ClockTime) {
        let mut state = self.state.lock();
        if time < state.now {
            tracing::warn!(
                "[{}] Ignoring attempt to move time backwards ({} -> {})",
                self.description,
                state.now,
                time
            );
            return;
        }
        state.now = time;
        self.changed.notify_all();
    }

    pub fn advance(&self, delta: ClockTime) {
        let mut state = self.state.lock();
        state.now += delta;
        self.changed.notify_all();
    }

    /// Targets of the waits currently blocked on this clock, in arrival order.
    pub fn pending_targets(&self) -> Vec<ClockTime> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|(_, target)| *target)
            .collect()
    }

    /// Block until at least `count` waits are pending or `timeout` elapses.
    pub fn wait_for_pending(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pending.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.pending.len() >= count;
            }
        }
        true
    }

    /// Move time to the earliest pending target. Returns the new time, or
    /// `None` if nothing is waiting.
    pub fn advance_to_next_pending(&self) -> Option<ClockTime> {
        let mut state = self.state.lock();
        let next = state.pending.iter().map(|(_, target)| *target).min()?;
        if next > state.now {
            state.now = next;
        }
        self.changed.notify_all();
        Some(state.now)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> ClockTime {
        self.state.lock().now
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn wait(&self, id: &ClockId) -> ClockWait {
        let mut state = self.state.lock();
        let mut registered = false;

        let result = loop {
            let (target, unscheduled) = {
                let entry = id.0.state.lock();
                (entry.target, entry.unscheduled)
            };

            if unscheduled {
                break ClockWait::unscheduled();
            }
            if state.now >= target {
                let status = if registered {
                    ClockReturn::Ok
                } else {
                    ClockReturn::Early
                };
                break ClockWait {
                    status,
                    jitter: target.diff(state.now),
                };
            }

            if !registered {
                state.pending.push((id.raw_id(), target));
                registered = true;
                self.changed.notify_all();
            }
            self.changed.wait(&mut state);
        };

        if registered {
            let raw = id.raw_id();
            state.pending.retain(|(pending, _)| *pending != raw);
            self.changed.notify_all();
        }
        result
    }

    fn unschedule(&self, id: &ClockId) {
        id.cancel();
        // Waiters park on the clock condvar, not the entry one.
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}
