// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded FIFO that moves the downstream chain onto its own thread.
//!
//! The producer's `push` ends at [`Queue`]'s sink pad: the item is enqueued
//! and the call returns. A consumer thread, started on Ready -> Paused,
//! dequeues and pushes on the src pad. The queue mutex protects the items and
//! levels only and is never held across the downstream push.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::core::buffer::{Buffer, BufferFlags};
use crate::core::bus::{Bus, BusMessage};
use crate::core::config::{LeakyPolicy, QueueConfig};
use crate::core::context::PipelineContext;
use crate::core::element::{Element, State, StateChange, StateChangeSuccess};
use crate::core::error::{FlowError, FlowResult, Result, StreamError};
use crate::core::event::{Event, StreamItem};
use crate::core::pad::{Pad, PadHandler};
use crate::core::time::ClockTime;

/// Current fill of a queue. Only buffers count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLevels {
    pub count: u32,
    pub bytes: u64,
    /// Sum of valid buffer durations.
    pub time: ClockTime,
}

impl QueueLevels {
    fn add(&mut self, buffer: &Buffer) {
        self.count += 1;
        self.bytes += buffer.size() as u64;
        if let Some(duration) = buffer.duration() {
            self.time += duration;
        }
    }

    fn remove(&mut self, buffer: &Buffer) {
        self.count = self.count.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(buffer.size() as u64);
        if let Some(duration) = buffer.duration() {
            self.time -= duration;
        }
    }

    /// Whether any enabled limit of `config` is reached.
    pub fn is_full(&self, config: &QueueConfig) -> bool {
        (config.max_count > 0 && self.count >= config.max_count)
            || (config.max_bytes > 0 && self.bytes >= config.max_bytes)
            || config
                .max_time
                .is_some_and(|max| max > ClockTime::ZERO && self.time >= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Buffers accepted into the queue.
    pub pushed: u64,
    /// Buffers handed to the consumer thread.
    pub popped: u64,
    /// Buffers discarded by a leaky policy.
    pub dropped: u64,
}

struct QueueData {
    items: VecDeque<StreamItem>,
    levels: QueueLevels,
    stats: QueueStats,
    running: bool,
    flushing: bool,
    eos: bool,
    /// An evicted buffer precedes the head; flag the next dequeued buffer.
    discont_head: bool,
    /// An incoming buffer was dropped; flag the next accepted buffer.
    discont_tail: bool,
    /// Last non-transient downstream failure, reported to the next enqueue.
    downstream: FlowResult,
    underrun_reported: bool,
    overrun_reported: bool,
}

impl QueueData {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            levels: QueueLevels::default(),
            stats: QueueStats::default(),
            running: false,
            flushing: true,
            eos: false,
            discont_head: false,
            discont_tail: false,
            downstream: Ok(()),
            underrun_reported: false,
            overrun_reported: false,
        }
    }

    fn clear(&mut self) {
        self.items.clear();
        self.levels = QueueLevels::default();
    }

    /// Remove the oldest buffer, leaving events in place.
    fn evict_oldest(&mut self) -> bool {
        let Some(index) = self.items.iter().position(StreamItem::is_buffer) else {
            return false;
        };
        if let Some(StreamItem::Buffer(buffer)) = self.items.remove(index) {
            self.levels.remove(&buffer);
        }
        true
    }
}

pub(crate) struct QueueInner {
    name: String,
    config: QueueConfig,
    data: Mutex<QueueData>,
    item_added: Condvar,
    item_removed: Condvar,
    src_pad: Arc<Pad>,
    bus: Bus,
}

impl QueueInner {
    fn enqueue(&self, item: StreamItem) -> FlowResult {
        let mut data = self.data.lock();

        let buffer = match item {
            StreamItem::Event(event) => return self.enqueue_event(&mut data, event),
            StreamItem::Buffer(buffer) => buffer,
        };

        loop {
            if data.flushing {
                return Err(FlowError::Flushing);
            }
            if data.eos {
                return Err(FlowError::Eos);
            }
            data.downstream.clone()?;

            if !data.levels.is_full(&self.config) {
                break;
            }

            if !data.overrun_reported {
                data.overrun_reported = true;
                tracing::debug!("[{}] Overrun: {:?}", self.name, data.levels);
                self.bus.post(BusMessage::Overrun {
                    element: self.name.clone(),
                });
            }

            match self.config.leaky {
                LeakyPolicy::Upstream => {
                    data.discont_tail = true;
                    data.stats.dropped += 1;
                    tracing::debug!(
                        "[{}] Queue full, dropping incoming buffer (pts={:?})",
                        self.name,
                        buffer.pts()
                    );
                    return Ok(());
                }
                LeakyPolicy::Downstream => {
                    if !data.evict_oldest() {
                        break;
                    }
                    data.discont_head = true;
                    data.stats.dropped += 1;
                    tracing::debug!("[{}] Queue full, evicted oldest buffer", self.name);
                }
                LeakyPolicy::None => {
                    self.item_removed.wait(&mut data);
                }
            }
        }

        tracing::trace!("[{}] Enqueue pts={:?}", self.name, buffer.pts());
        let buffer = if std::mem::take(&mut data.discont_tail) {
            buffer.with_added_flags(BufferFlags::DISCONT)
        } else {
            buffer
        };
        data.levels.add(&buffer);
        data.stats.pushed += 1;
        data.underrun_reported = false;
        data.items.push_back(StreamItem::Buffer(buffer));
        self.item_added.notify_one();
        Ok(())
    }

    fn enqueue_event(&self, data: &mut QueueData, event: Event) -> FlowResult {
        if data.flushing {
            return Err(FlowError::Flushing);
        }
        if data.eos {
            return Err(FlowError::Eos);
        }
        if matches!(event, Event::Eos) {
            data.eos = true;
        }
        data.items.push_back(StreamItem::Event(event));
        self.item_added.notify_one();
        Ok(())
    }

    /// Block until an item is available. Returns `None` once the consumer
    /// should stop.
    fn pop(&self) -> Option<StreamItem> {
        let mut data = self.data.lock();
        loop {
            if !data.running {
                return None;
            }

            if !data.flushing {
                if let Some(item) = data.items.pop_front() {
                    let item = match item {
                        StreamItem::Buffer(mut buffer) => {
                            data.levels.remove(&buffer);
                            data.stats.popped += 1;
                            if std::mem::take(&mut data.discont_head) {
                                buffer = buffer.with_added_flags(BufferFlags::DISCONT);
                            }
                            StreamItem::Buffer(buffer)
                        }
                        event => event,
                    };
                    if !data.levels.is_full(&self.config) {
                        data.overrun_reported = false;
                    }
                    self.item_removed.notify_one();
                    return Some(item);
                }

                if !data.underrun_reported {
                    data.underrun_reported = true;
                    tracing::trace!("[{}] Underrun", self.name);
                    self.bus.post(BusMessage::Underrun {
                        element: self.name.clone(),
                    });
                }
            }

            self.item_added.wait(&mut data);
        }
    }

    fn run(&self) {
        tracing::info!("[{}] Streaming thread started", self.name);

        while let Some(item) = self.pop() {
            let result = match item {
                StreamItem::Buffer(buffer) => self.src_pad.push(buffer),
                StreamItem::Event(event) => self.src_pad.push_event(event),
            };

            match result {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    tracing::debug!("[{}] Downstream is flushing", self.name);
                }
                Err(err) => self.record_downstream_error(err),
            }
        }

        tracing::info!("[{}] Streaming thread stopped", self.name);
    }

    fn record_downstream_error(&self, err: FlowError) {
        let mut data = self.data.lock();
        if data.flushing || data.downstream.is_err() {
            return;
        }

        match &err {
            FlowError::Eos => tracing::debug!("[{}] Downstream returned EOS", self.name),
            FlowError::NotLinked | FlowError::Error(_) => {
                tracing::warn!("[{}] Downstream failed: {}", self.name, err);
                self.bus.post(BusMessage::Error {
                    element: self.name.clone(),
                    message: err.to_string(),
                });
            }
            FlowError::Flushing => {}
        }
        data.downstream = Err(err);
        // Wake a producer blocked on a full queue so it sees the failure.
        self.item_removed.notify_all();
    }

    fn flush_start(&self) {
        let mut data = self.data.lock();
        data.flushing = true;
        data.clear();
        self.item_added.notify_all();
        self.item_removed.notify_all();
    }

    fn flush_stop(&self) {
        let mut data = self.data.lock();
        data.clear();
        data.flushing = false;
        data.eos = false;
        data.discont_head = false;
        data.discont_tail = false;
        data.downstream = Ok(());
        data.underrun_reported = false;
        data.overrun_reported = false;
        self.item_added.notify_all();
    }
}

impl PadHandler for QueueInner {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.enqueue(StreamItem::Buffer(buffer))
    }

    fn event(&self, _pad: &Pad, event: Event) -> FlowResult {
        match event {
            Event::FlushStart => {
                tracing::debug!("[{}] Flush start", self.name);
                self.flush_start();
                self.src_pad.push_event(Event::FlushStart)
            }
            Event::FlushStop { reset_time } => {
                tracing::debug!("[{}] Flush stop", self.name);
                // Forward first: the consumer stays parked until flushing clears.
                let result = self.src_pad.push_event(Event::FlushStop { reset_time });
                self.flush_stop();
                result
            }
            event => self.enqueue(StreamItem::Event(event)),
        }
    }
}

pub struct Queue {
    name: String,
    inner: Arc<QueueInner>,
    sink_pad: Arc<Pad>,
    state: Mutex<State>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    pub fn new(name: &str, config: QueueConfig, context: &PipelineContext) -> Arc<Queue> {
        let inner = Arc::new(QueueInner {
            name: name.to_string(),
            config,
            data: Mutex::new(QueueData::new()),
            item_added: Condvar::new(),
            item_removed: Condvar::new(),
            src_pad: Pad::new_src(&context.pads, name, "src"),
            bus: context.bus.clone(),
        });
        let sink_pad = Pad::new_sink(&context.pads, name, "sink", inner.clone());

        Arc::new(Queue {
            name: name.to_string(),
            inner,
            sink_pad,
            state: Mutex::new(State::Stopped),
            thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn levels(&self) -> QueueLevels {
        self.inner.data.lock().levels
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.data.lock().stats
    }

    fn start(&self) -> Result<()> {
        {
            let mut data = self.inner.data.lock();
            data.running = true;
            data.flushing = false;
            data.eos = false;
            data.discont_head = false;
            data.discont_tail = false;
            data.downstream = Ok(());
            data.underrun_reported = false;
            data.overrun_reported = false;
        }
        self.inner.src_pad.set_active(true);
        self.sink_pad.set_active(true);

        let inner = Arc::clone(&self.inner);
        let thread = std::thread::Builder::new()
            .name(format!("queue-{}", self.name))
            .spawn(move || inner.run())
            .map_err(|e| StreamError::Runtime(format!("Failed to spawn thread: {}", e)))?;
        *self.thread.lock() = Some(thread);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.sink_pad.set_active(false);
        {
            let mut data = self.inner.data.lock();
            data.running = false;
            data.flushing = true;
            self.inner.item_added.notify_all();
            self.inner.item_removed.notify_all();
        }

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("[{}] Streaming thread panicked", self.name);
                return Err(StreamError::Runtime(format!(
                    "Queue '{}' thread panicked",
                    self.name
                )));
            }
        }

        self.inner.src_pad.set_active(false);
        self.inner.data.lock().clear();
        Ok(())
    }
}

impl Element for Queue {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pad(&self) -> Option<&Arc<Pad>> {
        Some(&self.sink_pad)
    }

    fn src_pad(&self) -> Option<&Arc<Pad>> {
        Some(&self.inner.src_pad)
    }

    fn state(&self) -> State {
        *self.state.lock()
    }

    fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess> {
        tracing::debug!("[{}] {:?}", self.name, transition);
        match transition {
            StateChange::ReadyToPaused => self.start()?,
            StateChange::PausedToReady => self.stop()?,
            _ => {}
        }
        *self.state.lock() = transition.next();
        Ok(StateChangeSuccess::Success)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            let _ = self.stop();
        }
    }
}
