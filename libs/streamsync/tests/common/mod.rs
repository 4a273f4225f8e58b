// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use streamsync::prelude::*;
use streamsync::Bus;

/// What a [`RecordingRenderer`] saw for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendered {
    pub offset: Option<u64>,
    pub pts: Option<ClockTime>,
    pub flags: BufferFlags,
    pub at: Instant,
}

/// Sink renderer that records every preroll and render call.
#[derive(Default)]
pub struct RecordingRenderer {
    pub prerolled: Mutex<Vec<Option<u64>>>,
    pub rendered: Mutex<Vec<Rendered>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rendered_pts(&self) -> Vec<Option<ClockTime>> {
        self.rendered.lock().iter().map(|r| r.pts).collect()
    }
}

impl SinkRenderer for RecordingRenderer {
    fn preroll(&self, buffer: &Buffer) -> FlowResult {
        self.prerolled.lock().push(buffer.offset());
        Ok(())
    }

    fn render(&self, buffer: &Buffer) -> FlowResult {
        self.rendered.lock().push(Rendered {
            offset: buffer.offset(),
            pts: buffer.pts(),
            flags: buffer.flags(),
            at: Instant::now(),
        });
        Ok(())
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn wait_for_async_done(bus: &Bus, element: &str) -> bool {
    bus.timed_pop_filtered(TIMEOUT, |m| {
        matches!(m, BusMessage::AsyncDone { element: e } if e == element)
    })
    .is_some()
}

pub fn wait_for_eos(bus: &Bus, timeout: Duration) -> bool {
    bus.timed_pop_filtered(timeout, |m| matches!(m, BusMessage::Eos { .. }))
        .is_some()
}

/// Block until a clock wait for exactly `target` is pending.
pub fn wait_for_target(clock: &TestClock, target: ClockTime) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if clock.pending_targets().contains(&target) {
            return true;
        }
        clock.wait_for_pending(1, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Keep moving the clock to the next pending wait until a sink posts EOS.
pub fn drive_until_eos(clock: &TestClock, bus: &Bus) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if wait_for_eos(bus, Duration::from_millis(5)) {
            return true;
        }
        clock.advance_to_next_pending();
    }
    false
}
