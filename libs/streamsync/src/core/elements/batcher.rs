// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Groups consecutive buffers into fixed-duration batches.
//!
//! Input is accumulated until the newest buffer's pts is at least
//! `target_duration` past the first one, then the whole group is pushed as a
//! single `MARKER` buffer covering the group's time span. A partial batch is
//! pushed before EOS; flushes discard it.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::core::buffer::{Buffer, BufferFlags};
use crate::core::config::BatcherConfig;
use crate::core::context::PipelineContext;
use crate::core::element::{Element, State, StateChange, StateChangeSuccess};
use crate::core::error::{FlowResult, Result};
use crate::core::event::Event;
use crate::core::pad::{Pad, PadHandler};
use crate::core::time::{display_opt, ClockTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatcherStats {
    pub buffers_in: u64,
    pub batches_out: u64,
}

#[derive(Default)]
struct BatchState {
    pending: Vec<Buffer>,
    first_pts: Option<ClockTime>,
    next_index: u64,
    stats: BatcherStats,
}

impl BatchState {
    /// Take the pending group and build the outgoing buffer.
    fn take_batch(&mut self) -> Option<Buffer> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        let first_pts = self.first_pts.take();

        let mut flags = BufferFlags::MARKER;
        let mut payload = BytesMut::with_capacity(pending.iter().map(Buffer::size).sum());
        let mut last_end = None;
        for buffer in &pending {
            if buffer.has_flags(BufferFlags::DISCONT) {
                flags |= BufferFlags::DISCONT;
            }
            payload.extend_from_slice(buffer.payload());
            last_end = buffer.end_time().or(buffer.pts()).or(last_end);
        }

        let mut builder = Buffer::builder(payload.freeze())
            .offset(self.next_index)
            .flags(flags);
        if let Some(first_pts) = first_pts {
            builder = builder.pts(first_pts);
            if let Some(last_end) = last_end {
                builder = builder.duration(last_end - first_pts);
            }
        }

        self.next_index += 1;
        self.stats.batches_out += 1;
        Some(builder.build())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.first_pts = None;
    }
}

struct BatcherInner {
    name: String,
    config: BatcherConfig,
    src_pad: Arc<Pad>,
    state: Mutex<BatchState>,
}

impl BatcherInner {
    fn push_batch(&self, batch: Buffer) -> FlowResult {
        tracing::debug!(
            "[{}] Batch {} complete ({} bytes, pts={}, duration={})",
            self.name,
            batch.offset().unwrap_or_default(),
            batch.size(),
            display_opt(batch.pts()),
            display_opt(batch.duration())
        );
        self.src_pad.push(batch)
    }
}

impl PadHandler for BatcherInner {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        // Never hold the batch lock across the downstream push: a flush
        // needs it while the push may be blocked.
        let batch = {
            let mut st = self.state.lock();
            st.stats.buffers_in += 1;

            let pts = buffer.pts();
            if st.first_pts.is_none() {
                st.first_pts = pts;
            }
            st.pending.push(buffer);

            let complete = match (st.first_pts, pts) {
                (Some(first), Some(pts)) => pts - first >= self.config.target_duration,
                _ => false,
            };
            if complete { st.take_batch() } else { None }
        };

        match batch {
            Some(batch) => self.push_batch(batch),
            None => Ok(()),
        }
    }

    fn event(&self, _pad: &Pad, event: Event) -> FlowResult {
        match event {
            Event::Eos => {
                let partial = self.state.lock().take_batch();
                if let Some(batch) = partial {
                    self.push_batch(batch)?;
                }
                self.src_pad.push_event(Event::Eos)
            }
            Event::FlushStart | Event::FlushStop { .. } => {
                self.state.lock().reset();
                self.src_pad.push_event(event)
            }
            Event::Segment(_) => self.src_pad.push_event(event),
        }
    }
}

pub struct Batcher {
    name: String,
    inner: Arc<BatcherInner>,
    sink_pad: Arc<Pad>,
    state: Mutex<State>,
}

impl Batcher {
    pub fn new(name: &str, config: BatcherConfig, context: &PipelineContext) -> Arc<Batcher> {
        let inner = Arc::new(BatcherInner {
            name: name.to_string(),
            config,
            src_pad: Pad::new_src(&context.pads, name, "src"),
            state: Mutex::new(BatchState::default()),
        });
        let sink_pad = Pad::new_sink(&context.pads, name, "sink", inner.clone());

        Arc::new(Batcher {
            name: name.to_string(),
            inner,
            sink_pad,
            state: Mutex::new(State::Stopped),
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> BatcherStats {
        self.inner.state.lock().stats
    }
}

impl Element for Batcher {
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
            StateChange::ReadyToPaused => {
                self.inner.state.lock().reset();
                self.inner.src_pad.set_active(true);
                self.sink_pad.set_active(true);
            }
            StateChange::PausedToReady => {
                self.sink_pad.set_active(false);
                self.inner.src_pad.set_active(false);
                let mut st = self.inner.state.lock();
                tracing::info!(
                    "[{}] {} batches from {} buffers",
                    self.name,
                    st.stats.batches_out,
                    st.stats.buffers_in
                );
                st.reset();
            }
            _ => {}
        }
        *self.state.lock() = transition.next();
        Ok(StateChangeSuccess::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clocks::TestClock;

    #[derive(Default)]
    struct Collector {
        buffers: Mutex<Vec<Buffer>>,
        events: Mutex<Vec<&'static str>>,
    }

    impl PadHandler for Collector {
        fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
            self.buffers.lock().push(buffer);
            Ok(())
        }

        fn event(&self, _pad: &Pad, event: Event) -> FlowResult {
            self.events.lock().push(event.name());
            Ok(())
        }
    }

    struct Harness {
        _context: PipelineContext,
        batcher: Arc<Batcher>,
        collector: Arc<Collector>,
        src: Arc<Pad>,
        _sink: Arc<Pad>,
    }

    fn harness(target_ms: u64) -> Harness {
        let context = PipelineContext::new(Arc::new(TestClock::new()));
        let config = BatcherConfig {
            target_duration: ClockTime::from_mseconds(target_ms),
        };
        let batcher = Batcher::new("batcher", config, &context);
        let collector = Arc::new(Collector::default());
        let src = Pad::new_src(&context.pads, "test", "src");
        let sink = Pad::new_sink(&context.pads, "collector", "sink", collector.clone());
        context.pads.link(&src, batcher.sink_pad().unwrap()).unwrap();
        context.pads.link(batcher.src_pad().unwrap(), &sink).unwrap();
        src.set_active(true);
        sink.set_active(true);
        batcher.change_state(StateChange::StoppedToReady).unwrap();
        batcher.change_state(StateChange::ReadyToPaused).unwrap();
        Harness {
            _context: context,
            batcher,
            collector,
            src,
            _sink: sink,
        }
    }

    fn frame(n: u64, flags: BufferFlags) -> Buffer {
        Buffer::builder(vec![n as u8; 2])
            .pts(ClockTime::from_mseconds(n * 100))
            .duration(ClockTime::from_mseconds(100))
            .flags(flags)
            .build()
    }

    #[test]
    fn test_emits_batch_once_target_reached() {
        let h = harness(200);
        h.src.push(frame(0, BufferFlags::DISCONT)).unwrap();
        h.src.push(frame(1, BufferFlags::empty())).unwrap();
        assert!(h.collector.buffers.lock().is_empty());

        h.src.push(frame(2, BufferFlags::empty())).unwrap();
        let buffers = h.collector.buffers.lock();
        assert_eq!(buffers.len(), 1);

        let batch = &buffers[0];
        assert_eq!(batch.pts(), Some(ClockTime::ZERO));
        assert_eq!(batch.duration(), Some(ClockTime::from_mseconds(300)));
        assert_eq!(batch.offset(), Some(0));
        assert!(batch.has_flags(BufferFlags::MARKER | BufferFlags::DISCONT));
        assert_eq!(batch.payload().as_ref(), &[0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_eos_flushes_partial_batch_first() {
        let h = harness(1000);
        for n in 3..5 {
            h.src.push(frame(n, BufferFlags::empty())).unwrap();
        }
        h.src.push_event(Event::Eos).unwrap();

        let buffers = h.collector.buffers.lock();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].pts(), Some(ClockTime::from_mseconds(300)));
        assert_eq!(buffers[0].duration(), Some(ClockTime::from_mseconds(200)));
        assert!(!buffers[0].has_flags(BufferFlags::DISCONT));
        assert_eq!(*h.collector.events.lock(), vec!["eos"]);
        assert_eq!(
            h.batcher.stats(),
            BatcherStats {
                buffers_in: 2,
                batches_out: 1
            }
        );
    }

    #[test]
    fn test_flush_discards_pending() {
        let h = harness(1000);
        h.src.push(frame(0, BufferFlags::empty())).unwrap();
        h.src.push_event(Event::FlushStart).unwrap();
        h.src.push_event(Event::FlushStop { reset_time: false }).unwrap();
        h.src.push_event(Event::Eos).unwrap();

        assert!(h.collector.buffers.lock().is_empty());
        assert_eq!(
            *h.collector.events.lock(),
            vec!["flush-start", "flush-stop", "eos"]
        );
    }
}
