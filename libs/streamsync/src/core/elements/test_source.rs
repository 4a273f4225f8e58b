// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synthetic frame producer.
//!
//! Runs its own streaming thread. A non-live source starts pushing as soon
//! as it reaches Paused so downstream sinks can preroll; a live source only
//! produces while Playing and paces every frame on the pipeline clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::core::buffer::{Buffer, BufferFlags};
use crate::core::bus::BusMessage;
use crate::core::clocks::{ClockId, ClockReturn};
use crate::core::config::TestSourceConfig;
use crate::core::context::PipelineContext;
use crate::core::element::{Element, State, StateChange, StateChangeSuccess};
use crate::core::error::{FlowError, FlowResult, Result, StreamError};
use crate::core::event::Event;
use crate::core::pad::Pad;
use crate::core::segment::Segment;
use crate::core::time::ClockTime;

struct Control {
    running: bool,
    playing: bool,
    flushing: bool,
    /// Stopped producing after EOS or a fatal downstream result.
    finished: bool,
    clock_id: Option<ClockId>,
}

struct StreamPosition {
    n: u64,
    segment: Arc<Segment>,
    need_segment: bool,
    discont: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    /// Buffers accepted downstream.
    pub produced: u64,
    /// Pushes refused with a non-transient error.
    pub failed: u64,
}

struct SourceInner {
    name: String,
    config: TestSourceConfig,
    context: PipelineContext,
    src_pad: Arc<Pad>,
    control: Mutex<Control>,
    control_cond: Condvar,
    stream: Mutex<StreamPosition>,
    produced: AtomicU64,
    failed: AtomicU64,
}

impl SourceInner {
    fn can_produce(&self, ctl: &Control) -> bool {
        !ctl.flushing && !ctl.finished && (ctl.playing || !self.config.is_live)
    }

    /// Park until producing is allowed. Returns `false` once the thread
    /// should exit.
    fn wait_until_producing(&self) -> bool {
        let mut ctl = self.control.lock();
        loop {
            if !ctl.running {
                return false;
            }
            if self.can_produce(&ctl) {
                return true;
            }
            self.control_cond.wait(&mut ctl);
        }
    }

    /// Wait for the clock to reach the running time of the next frame.
    /// Returns `false` if the wait was interrupted by a state change.
    fn wait_live(&self, running_time: ClockTime) -> bool {
        let clock = &self.context.clock;
        let id = {
            let mut ctl = self.control.lock();
            if !ctl.running || !self.can_produce(&ctl) {
                return false;
            }
            let Some(target) = self.context.clock_time_for(running_time) else {
                return false;
            };
            match &ctl.clock_id {
                Some(id) => {
                    clock.reinit(id, target);
                    id.clone()
                }
                None => {
                    let id = clock.new_single_shot_id(target);
                    ctl.clock_id = Some(id.clone());
                    id
                }
            }
        };

        clock.wait(&id).status != ClockReturn::Unscheduled
    }

    fn unschedule(&self, ctl: &Control) {
        if let Some(id) = &ctl.clock_id {
            self.context.clock.unschedule(id);
        }
    }

    fn finish(&self) {
        self.control.lock().finished = true;
    }

    fn run(&self) {
        tracing::info!(
            "[{}] Streaming thread started ({} fps, live={})",
            self.name,
            self.config.fps,
            self.config.is_live
        );

        while self.wait_until_producing() {
            let mut stream = self.stream.lock();

            if self
                .config
                .num_buffers
                .is_some_and(|limit| stream.n >= limit)
            {
                tracing::info!("[{}] Sent {} buffers, sending EOS", self.name, stream.n);
                self.finish();
                match self.src_pad.push_event(Event::Eos) {
                    Ok(()) | Err(FlowError::Flushing) | Err(FlowError::Eos) => {}
                    Err(err) => self.report_failure(err),
                }
                continue;
            }

            if stream.need_segment {
                let segment = Arc::clone(&stream.segment);
                match self.src_pad.push_event(Event::Segment(segment)) {
                    Ok(()) => stream.need_segment = false,
                    Err(FlowError::Flushing) => continue,
                    Err(err) => {
                        self.report_failure(err);
                        continue;
                    }
                }
            }

            let pts = self.config.pts_for(stream.n);
            if self.config.is_live {
                let running_time = stream.segment.to_running_time(pts).unwrap_or(ClockTime::ZERO);
                // Waiting here does not hold the stream lock, so flushes can
                // serialize with us.
                let ready = parking_lot::MutexGuard::unlocked(&mut stream, || {
                    self.wait_live(running_time)
                });
                if !ready {
                    continue;
                }
            }

            let mut flags = BufferFlags::empty();
            if stream.discont {
                flags |= BufferFlags::DISCONT;
            }
            let buffer = Buffer::builder(Bytes::from(vec![0u8; self.config.payload_size]))
                .pts(pts)
                .duration(self.config.frame_duration())
                .offset(stream.n)
                .flags(flags)
                .build();

            tracing::trace!("[{}] Push offset={} pts={}", self.name, stream.n, pts);
            match self.src_pad.push(buffer) {
                Ok(()) => {
                    stream.n += 1;
                    stream.discont = false;
                    self.produced.fetch_add(1, Ordering::Relaxed);
                }
                Err(FlowError::Flushing) => {
                    tracing::debug!("[{}] Downstream is flushing", self.name);
                    stream.n += 1;
                }
                Err(FlowError::Eos) => {
                    tracing::debug!("[{}] Downstream is EOS, stopping", self.name);
                    self.finish();
                }
                Err(err) => self.report_failure(err),
            }
        }

        tracing::info!("[{}] Streaming thread stopped", self.name);
    }

    fn report_failure(&self, err: FlowError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("[{}] Push failed: {}", self.name, err);
        self.context.bus.post(BusMessage::Error {
            element: self.name.clone(),
            message: err.to_string(),
        });
        self.finish();
    }

    fn flush_start(&self) -> FlowResult {
        {
            let mut ctl = self.control.lock();
            ctl.flushing = true;
            self.unschedule(&ctl);
        }
        self.src_pad.push_event(Event::FlushStart)
    }

    fn flush_stop(&self, reset_time: bool) -> FlowResult {
        let result = {
            let mut stream = self.stream.lock();
            let result = self.src_pad.push_event(Event::FlushStop { reset_time });
            if reset_time {
                // Running time restarts at zero from the next frame.
                let start = self.config.pts_for(stream.n);
                stream.segment = Arc::new(
                    Segment::new(start, None, 1.0, ClockTime::ZERO).unwrap_or_default(),
                );
            }
            stream.need_segment = true;
            stream.discont = true;
            result
        };

        let mut ctl = self.control.lock();
        ctl.flushing = false;
        ctl.finished = false;
        self.control_cond.notify_all();
        result
    }
}

pub struct TestSource {
    name: String,
    inner: Arc<SourceInner>,
    state: Mutex<State>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TestSource {
    pub fn new(
        name: &str,
        config: TestSourceConfig,
        context: &PipelineContext,
    ) -> Result<Arc<TestSource>> {
        config.validate()?;

        let inner = Arc::new(SourceInner {
            name: name.to_string(),
            config,
            context: context.clone(),
            src_pad: Pad::new_src(&context.pads, name, "src"),
            control: Mutex::new(Control {
                running: false,
                playing: false,
                flushing: false,
                finished: false,
                clock_id: None,
            }),
            control_cond: Condvar::new(),
            stream: Mutex::new(StreamPosition {
                n: 0,
                segment: Arc::new(Segment::default()),
                need_segment: true,
                discont: true,
            }),
            produced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        Ok(Arc::new(TestSource {
            name: name.to_string(),
            inner,
            state: Mutex::new(State::Stopped),
            thread: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &TestSourceConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            produced: self.inner.produced.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    fn start(&self) -> Result<()> {
        {
            let mut stream = self.inner.stream.lock();
            stream.n = 0;
            stream.segment = Arc::new(Segment::default());
            stream.need_segment = true;
            stream.discont = true;
        }
        {
            let mut ctl = self.inner.control.lock();
            ctl.running = true;
            ctl.playing = false;
            ctl.flushing = false;
            ctl.finished = false;
        }
        self.inner.src_pad.set_active(true);

        let inner = Arc::clone(&self.inner);
        let thread = std::thread::Builder::new()
            .name(format!("source-{}", self.name))
            .spawn(move || inner.run())
            .map_err(|e| StreamError::Runtime(format!("Failed to spawn thread: {}", e)))?;
        *self.thread.lock() = Some(thread);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        {
            let mut ctl = self.inner.control.lock();
            ctl.running = false;
            self.inner.unschedule(&ctl);
            self.inner.control_cond.notify_all();
        }
        self.inner.src_pad.set_active(false);

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("[{}] Streaming thread panicked", self.name);
                return Err(StreamError::Runtime(format!(
                    "Source '{}' thread panicked",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn set_playing(&self, playing: bool) {
        let mut ctl = self.inner.control.lock();
        ctl.playing = playing;
        if !playing {
            self.inner.unschedule(&ctl);
        }
        self.inner.control_cond.notify_all();
    }
}

impl Element for TestSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn src_pad(&self) -> Option<&Arc<Pad>> {
        Some(&self.inner.src_pad)
    }

    fn state(&self) -> State {
        *self.state.lock()
    }

    fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess> {
        tracing::debug!("[{}] {:?}", self.name, transition);
        let live = self.inner.config.is_live;

        let success = match transition {
            StateChange::ReadyToPaused => {
                self.start()?;
                if live {
                    StateChangeSuccess::NoPreroll
                } else {
                    StateChangeSuccess::Success
                }
            }
            StateChange::PausedToPlaying => {
                self.set_playing(true);
                StateChangeSuccess::Success
            }
            StateChange::PlayingToPaused => {
                self.set_playing(false);
                if live {
                    StateChangeSuccess::NoPreroll
                } else {
                    StateChangeSuccess::Success
                }
            }
            StateChange::PausedToReady => {
                self.stop()?;
                StateChangeSuccess::Success
            }
            StateChange::StoppedToReady | StateChange::ReadyToStopped => {
                StateChangeSuccess::Success
            }
        };

        *self.state.lock() = transition.next();
        Ok(success)
    }

    fn send_event(&self, event: Event) -> FlowResult {
        match event {
            Event::FlushStart => self.inner.flush_start(),
            Event::FlushStop { reset_time } => self.inner.flush_stop(reset_time),
            Event::Eos => {
                let _stream = self.inner.stream.lock();
                self.inner.finish();
                self.inner.src_pad.push_event(Event::Eos)
            }
            Event::Segment(segment) => {
                let mut stream = self.inner.stream.lock();
                stream.segment = segment;
                stream.need_segment = true;
                Ok(())
            }
        }
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clocks::TestClock;
    use crate::core::pad::PadHandler;
    use std::time::Duration;

    #[derive(Default)]
    struct Collector {
        buffers: Mutex<Vec<(Option<u64>, Option<ClockTime>, bool)>>,
        events: Mutex<Vec<&'static str>>,
    }

    impl PadHandler for Collector {
        fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
            self.buffers.lock().push((
                buffer.offset(),
                buffer.pts(),
                buffer.has_flags(BufferFlags::DISCONT),
            ));
            Ok(())
        }

        fn event(&self, _pad: &Pad, event: Event) -> FlowResult {
            self.events.lock().push(event.name());
            Ok(())
        }
    }

    fn source_into_collector(
        config: TestSourceConfig,
    ) -> (PipelineContext, Arc<TestSource>, Arc<Collector>, Arc<Pad>) {
        let context = PipelineContext::new(Arc::new(TestClock::new()));
        let source = TestSource::new("src", config, &context).unwrap();
        let collector = Arc::new(Collector::default());
        let sink = Pad::new_sink(&context.pads, "collector", "sink", collector.clone());
        context.pads.link(source.src_pad().unwrap(), &sink).unwrap();
        sink.set_active(true);
        (context, source, collector, sink)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_rejects_invalid_fps() {
        let context = PipelineContext::new(Arc::new(TestClock::new()));
        let config = TestSourceConfig {
            fps: 0.0,
            ..Default::default()
        };
        assert!(TestSource::new("src", config, &context).is_err());
    }

    #[test]
    fn test_non_live_source_produces_in_paused_then_eos() {
        let config = TestSourceConfig {
            fps: 25.0,
            num_buffers: Some(3),
            payload_size: 16,
            ..Default::default()
        };
        let (_context, source, collector, _sink) = source_into_collector(config);

        source.change_state(StateChange::StoppedToReady).unwrap();
        assert_eq!(
            source.change_state(StateChange::ReadyToPaused).unwrap(),
            StateChangeSuccess::Success
        );
        wait_for(|| collector.events.lock().contains(&"eos"));

        let buffers = collector.buffers.lock().clone();
        assert_eq!(
            buffers,
            vec![
                (Some(0), Some(ClockTime::ZERO), true),
                (Some(1), Some(ClockTime::from_mseconds(40)), false),
                (Some(2), Some(ClockTime::from_mseconds(80)), false),
            ]
        );
        assert_eq!(*collector.events.lock(), vec!["segment", "eos"]);
        assert_eq!(source.stats().produced, 3);

        source.change_state(StateChange::PausedToReady).unwrap();
    }

    #[test]
    fn test_live_source_waits_for_playing() {
        let config = TestSourceConfig {
            fps: 10.0,
            num_buffers: Some(2),
            is_live: true,
            ..Default::default()
        };
        let (context, source, collector, _sink) = source_into_collector(config);

        source.change_state(StateChange::StoppedToReady).unwrap();
        assert_eq!(
            source.change_state(StateChange::ReadyToPaused).unwrap(),
            StateChangeSuccess::NoPreroll
        );
        std::thread::sleep(Duration::from_millis(20));
        assert!(collector.buffers.lock().is_empty());

        context.base_time.set(Some(context.clock.now()));
        source.change_state(StateChange::PausedToPlaying).unwrap();
        // First frame is due at base time, which is now.
        wait_for(|| collector.buffers.lock().len() == 1);
        source.change_state(StateChange::PlayingToPaused).unwrap();
        source.change_state(StateChange::PausedToReady).unwrap();
        assert_eq!(source.stats().produced, 1);
    }

    #[test]
    fn test_unlinked_source_reports_error() {
        let context = PipelineContext::new(Arc::new(TestClock::new()));
        let source = TestSource::new("lonely", TestSourceConfig::default(), &context).unwrap();
        source.change_state(StateChange::StoppedToReady).unwrap();
        source.change_state(StateChange::ReadyToPaused).unwrap();

        let error = context
            .bus
            .timed_pop_filtered(Duration::from_secs(5), |m| matches!(m, BusMessage::Error { .. }));
        assert!(error.is_some());
        assert_eq!(source.stats().failed, 1);
        source.change_state(StateChange::PausedToReady).unwrap();
    }
}
