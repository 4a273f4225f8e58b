// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod buffer;
pub mod bus;
pub mod clocks;
pub mod config;
pub mod context;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod pad;
pub mod pipeline;
pub mod prelude;
pub mod segment;
pub mod time;

pub use buffer::{Buffer, BufferBuilder, BufferFlags};
pub use bus::{Bus, BusMessage, QosReport};
pub use clocks::{Clock, ClockId, ClockReturn, ClockWait, SystemClock, TestClock};
pub use config::{
    BatcherConfig, LatePolicy, LeakyPolicy, PipelineConfig, QueueConfig, SyncSinkConfig,
    TestSourceConfig,
};
pub use context::{BaseTime, PipelineContext};
pub use element::{Element, State, StateChange, StateChangeSuccess};
pub use elements::*;
pub use error::*;
pub use event::{Event, StreamItem};
pub use pad::{Pad, PadDirection, PadHandler, PadId, PadTable, ProbeReturn};
pub use pipeline::Pipeline;
pub use segment::Segment;
pub use time::{ClockTime, ClockTimeDiff};
