// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Instant;

use super::{Clock, ClockId, ClockReturn, ClockWait};
use crate::core::time::ClockTime;

/// Monotonic host clock. Time zero is the moment the clock was created.
pub struct SystemClock {
    start_time: Instant,
    description: String,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::with_description("System Clock".to_string())
    }

    pub fn with_description(description: String) -> Self {
        Self {
            start_time: Instant::now(),
            description,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTime {
        ClockTime::from(self.start_time.elapsed())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn wait(&self, id: &ClockId) -> ClockWait {
        let entry = &id.0;
        let mut state = entry.state.lock();
        let mut blocked = false;

        loop {
            if state.unscheduled {
                return ClockWait::unscheduled();
            }

            let now = self.now();
            if now >= state.target {
                let status = if blocked {
                    ClockReturn::Ok
                } else {
                    ClockReturn::Early
                };
                return ClockWait {
                    status,
                    jitter: state.target.diff(now),
                };
            }

            // The entry mutex is released while parked, so `unschedule`
            // never waits on us.
            let remaining = (state.target - now).as_duration();
            entry.cond.wait_for(&mut state, remaining);
            blocked = true;
        }
    }

    fn unschedule(&self, id: &ClockId) {
        id.cancel();
    }
}
