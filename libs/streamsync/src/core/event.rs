// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::sync::Arc;

use crate::core::buffer::Buffer;
use crate::core::segment::Segment;

/// Control signals travelling the same chain as buffers.
#[derive(Debug, Clone)]
pub enum Event {
    /// New time-domain snapshot. Replaces the receiver's segment wholesale.
    Segment(Arc<Segment>),
    /// Out-of-band: start discarding data and wake blocked streaming threads.
    FlushStart,
    /// Serialized: flushing is over. `reset_time` restarts running time at zero.
    FlushStop { reset_time: bool },
    /// No more data follows on this stream.
    Eos,
}

impl Event {
    /// Whether the event must stay ordered with buffers.
    pub fn is_serialized(&self) -> bool {
        !matches!(self, Event::FlushStart)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Segment(_) => "segment",
            Event::FlushStart => "flush-start",
            Event::FlushStop { .. } => "flush-stop",
            Event::Eos => "eos",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Segment(segment) => write!(f, "segment({segment})"),
            Event::FlushStop { reset_time } => write!(f, "flush-stop(reset_time={reset_time})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Anything a queue can hold.
#[derive(Debug)]
pub enum StreamItem {
    Buffer(Buffer),
    Event(Event),
}

impl StreamItem {
    /// Size counted toward queue byte levels. Events count as zero.
    pub fn size(&self) -> usize {
        match self {
            StreamItem::Buffer(buffer) => buffer.size(),
            StreamItem::Event(_) => 0,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, StreamItem::Buffer(_))
    }
}

impl From<Buffer> for StreamItem {
    fn from(buffer: Buffer) -> Self {
        StreamItem::Buffer(buffer)
    }
}

impl From<Event> for StreamItem {
    fn from(event: Event) -> Self {
        StreamItem::Event(event)
    }
}
