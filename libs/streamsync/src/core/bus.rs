// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Out-of-band notifications from elements to the application.
//!
//! Streaming threads post fire-and-forget messages; the application drains
//! them with [`Bus::pop`] / [`Bus::timed_pop`]. Posting never blocks.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::element::State;
use crate::core::time::{ClockTime, ClockTimeDiff};

/// Quality-of-service measurement reported by a sink for a late buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosReport {
    pub element: String,
    /// Running time of the late buffer.
    pub running_time: ClockTime,
    /// How late the buffer was, in nanoseconds. Positive means late.
    pub lateness: ClockTimeDiff,
    /// Whether the buffer was dropped instead of rendered.
    pub dropped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    StateChanged {
        element: String,
        old: State,
        new: State,
    },
    /// A sink completed its asynchronous Paused transition by prerolling.
    AsyncDone { element: String },
    Eos { element: String },
    Error { element: String, message: String },
    /// A queue ran empty.
    Underrun { element: String },
    /// A queue hit one of its limits.
    Overrun { element: String },
    Qos(QosReport),
}

impl BusMessage {
    /// Name of the element that posted the message.
    pub fn source(&self) -> &str {
        match self {
            BusMessage::StateChanged { element, .. }
            | BusMessage::AsyncDone { element }
            | BusMessage::Eos { element }
            | BusMessage::Error { element, .. }
            | BusMessage::Underrun { element }
            | BusMessage::Overrun { element } => element,
            BusMessage::Qos(report) => &report.element,
        }
    }
}

/// Cloneable handle to a pipeline's message channel.
#[derive(Clone)]
pub struct Bus {
    tx: Sender<BusMessage>,
    rx: Receiver<BusMessage>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn post(&self, message: BusMessage) {
        tracing::trace!("[{}] bus: {:?}", message.source(), message);
        // The bus owns a receiver, so the channel can never be disconnected.
        let _ = self.tx.send(message);
    }

    /// Next pending message, without blocking.
    pub fn pop(&self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message.
    pub fn timed_pop(&self, timeout: Duration) -> Option<BusMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for a message matching `filter`. Messages that do
    /// not match are discarded.
    pub fn timed_pop_filtered<F>(&self, timeout: Duration, mut filter: F) -> Option<BusMessage>
    where
        F: FnMut(&BusMessage) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let message = self.rx.recv_deadline(deadline).ok()?;
            if filter(&message) {
                return Some(message);
            }
        }
    }

    /// Take every pending message.
    pub fn drain(&self) -> Vec<BusMessage> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
