// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared handles every element receives at construction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::bus::Bus;
use crate::core::clocks::Clock;
use crate::core::pad::PadTable;
use crate::core::time::ClockTime;

const BASE_TIME_UNSET: u64 = u64::MAX;

/// Clock time that corresponds to running time zero for the current playing
/// session. Written only by the pipeline, read by every sink and live source.
#[derive(Debug)]
pub struct BaseTime(AtomicU64);

impl BaseTime {
    pub fn new() -> Self {
        BaseTime(AtomicU64::new(BASE_TIME_UNSET))
    }

    pub fn get(&self) -> Option<ClockTime> {
        match self.0.load(Ordering::Acquire) {
            BASE_TIME_UNSET => None,
            ns => Some(ClockTime::from_nseconds(ns)),
        }
    }

    pub(crate) fn set(&self, base_time: Option<ClockTime>) {
        let raw = base_time.map_or(BASE_TIME_UNSET, ClockTime::nseconds);
        self.0.store(raw, Ordering::Release);
    }
}

impl Default for BaseTime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct PipelineContext {
    pub clock: Arc<dyn Clock>,
    pub base_time: Arc<BaseTime>,
    pub pads: Arc<PadTable>,
    pub bus: Bus,
}

impl PipelineContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            base_time: Arc::new(BaseTime::new()),
            pads: Arc::new(PadTable::new()),
            bus: Bus::new(),
        }
    }

    /// Current base time, `None` until the pipeline first reaches Playing.
    pub fn base_time(&self) -> Option<ClockTime> {
        self.base_time.get()
    }

    /// Map a running time onto the clock.
    pub fn clock_time_for(&self, running_time: ClockTime) -> Option<ClockTime> {
        Some(running_time + self.base_time()?)
    }
}
