// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Commonly used types for `use streamsync::prelude::*`.

pub use crate::core::{
    // Data
    buffer::{Buffer, BufferFlags},
    event::Event,
    segment::Segment,
    time::ClockTime,

    // Errors
    error::{FlowError, FlowResult, Result, StreamError},

    // Clocks
    clocks::{Clock, SystemClock, TestClock},

    // Elements
    element::{Element, State},
    elements::{Batcher, Queue, SinkRenderer, SyncSink, TestSource},
    pad::{Pad, PadHandler},

    // Pipeline
    bus::BusMessage,
    pipeline::Pipeline,
};
