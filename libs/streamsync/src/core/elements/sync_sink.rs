// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock-synchronized sink.
//!
//! For every buffer the sink computes its running time from the current
//! segment, prerolls while the pipeline is Paused, waits on the pipeline
//! clock until `base_time + running_time` and then hands the buffer to a
//! [`SinkRenderer`]. Three things can block the streaming thread here: the
//! preroll wait, the clock wait and the renderer itself. The first two are
//! cancelled by flushes and state changes from other threads.
//!
//! If a flush races a completing clock wait, the flush wins and the buffer is
//! abandoned with `Flushing`.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::core::buffer::Buffer;
use crate::core::bus::{BusMessage, QosReport};
use crate::core::clocks::{ClockId, ClockReturn};
use crate::core::config::{LatePolicy, SyncSinkConfig};
use crate::core::context::PipelineContext;
use crate::core::element::{Element, State, StateChange, StateChangeSuccess};
use crate::core::error::{FlowError, FlowResult, Result};
use crate::core::event::Event;
use crate::core::pad::{Pad, PadHandler};
use crate::core::segment::Segment;
use crate::core::time::{display_opt, ClockTime, ClockTimeDiff};

/// External render/upload callbacks of a sink.
pub trait SinkRenderer: Send + Sync {
    /// Stream-time interval covered by `buffer`.
    fn get_times(&self, buffer: &Buffer) -> (Option<ClockTime>, Option<ClockTime>) {
        (buffer.pts(), buffer.end_time())
    }

    /// Called with the first buffer after entering `NeedPreroll`.
    fn preroll(&self, buffer: &Buffer) -> FlowResult {
        let _ = buffer;
        Ok(())
    }

    fn render(&self, buffer: &Buffer) -> FlowResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerollState {
    /// Waiting for the first buffer after entering Paused.
    NeedPreroll,
    /// Clock is running; buffers are synchronized and rendered.
    Prerolled,
    /// Refusing data until the flush ends or the sink is restarted.
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub rendered: u64,
    /// Late buffers that were not rendered.
    pub dropped_late: u64,
    /// Buffers later than `max_lateness`, rendered or not.
    pub late: u64,
    pub out_of_segment: u64,
    /// Preroll callbacks delivered.
    pub prerolled: u64,
    /// Scheduled wait of the last synchronized buffer (zero when not synced).
    pub last_wait: ClockTime,
    pub total_wait: ClockTime,
    /// Jitter of the last completed clock wait.
    pub last_jitter: ClockTimeDiff,
}

struct SinkState {
    preroll: PrerollState,
    playing: bool,
    preroll_delivered: bool,
    eos: bool,
    segment: Arc<Segment>,
    clock_id: Option<ClockId>,
    position: Option<(ClockTime, Option<ClockTime>)>,
    stats: SinkStats,
}

impl SinkState {
    fn need_preroll(&mut self) {
        self.preroll = PrerollState::NeedPreroll;
        self.preroll_delivered = false;
    }
}

pub(crate) struct SinkInner {
    name: String,
    config: SyncSinkConfig,
    renderer: Arc<dyn SinkRenderer>,
    context: PipelineContext,
    state: Mutex<SinkState>,
    preroll_cond: Condvar,
}

/// What the synchronization step decided for a buffer.
enum SyncOutcome {
    Render,
    DropLate,
}

impl SinkInner {
    /// Block while the sink is in `NeedPreroll`, delivering the preroll
    /// callback once per state entry.
    fn wait_preroll(
        &self,
        st: &mut MutexGuard<'_, SinkState>,
        buffer: Option<&Buffer>,
    ) -> FlowResult {
        loop {
            match st.preroll {
                PrerollState::Flushing => return Err(FlowError::Flushing),
                PrerollState::Prerolled => return Ok(()),
                PrerollState::NeedPreroll => {}
            }

            if !st.preroll_delivered {
                st.preroll_delivered = true;
                if let Some(buffer) = buffer {
                    let renderer = &self.renderer;
                    MutexGuard::unlocked(st, || renderer.preroll(buffer))?;
                    st.stats.prerolled += 1;
                }
                if st.preroll == PrerollState::Flushing {
                    return Err(FlowError::Flushing);
                }
                tracing::debug!("[{}] Prerolled", self.name);
                self.context.bus.post(BusMessage::AsyncDone {
                    element: self.name.clone(),
                });
                continue;
            }

            if st.playing || !self.config.sync {
                st.preroll = PrerollState::Prerolled;
                return Ok(());
            }

            tracing::debug!("[{}] Waiting for Playing", self.name);
            self.preroll_cond.wait(st);
        }
    }

    /// Preroll, then wait on the clock until `running_time` is due.
    fn synchronize(
        &self,
        st: &mut MutexGuard<'_, SinkState>,
        buffer: &Buffer,
        running_time: Option<ClockTime>,
    ) -> std::result::Result<SyncOutcome, FlowError> {
        loop {
            self.wait_preroll(st, Some(buffer))?;

            let Some(running_time) = running_time.filter(|_| self.config.sync) else {
                st.stats.last_wait = ClockTime::ZERO;
                return Ok(SyncOutcome::Render);
            };
            let Some(clock_time) = self.context.clock_time_for(running_time) else {
                tracing::debug!("[{}] No base time, rendering unsynchronized", self.name);
                st.stats.last_wait = ClockTime::ZERO;
                return Ok(SyncOutcome::Render);
            };

            let clock = &self.context.clock;
            let id = match &st.clock_id {
                Some(id) => {
                    clock.reinit(id, clock_time);
                    id.clone()
                }
                None => {
                    let id = clock.new_single_shot_id(clock_time);
                    st.clock_id = Some(id.clone());
                    id
                }
            };

            let now = clock.now();
            let scheduled = clock_time - now;
            tracing::debug!(
                "[{}] Waiting for clock time {} (running {}, now {})",
                self.name,
                clock_time,
                running_time,
                now
            );

            let result = MutexGuard::unlocked(st, || clock.wait(&id));

            if st.preroll == PrerollState::Flushing {
                tracing::debug!("[{}] Flushed while waiting", self.name);
                return Err(FlowError::Flushing);
            }

            match result.status {
                ClockReturn::Unscheduled => {
                    tracing::debug!("[{}] Wait unscheduled, re-checking preroll", self.name);
                    continue;
                }
                ClockReturn::Ok | ClockReturn::Early => {
                    st.stats.last_wait = scheduled;
                    st.stats.total_wait += scheduled;
                    st.stats.last_jitter = result.jitter;

                    let lateness = -result.jitter;
                    let Some(max_lateness) = self.config.max_lateness else {
                        return Ok(SyncOutcome::Render);
                    };
                    if lateness <= max_lateness.nseconds() as ClockTimeDiff {
                        return Ok(SyncOutcome::Render);
                    }

                    st.stats.late += 1;
                    let dropped = self.config.late_policy == LatePolicy::Drop;
                    if dropped {
                        st.stats.dropped_late += 1;
                        tracing::warn!(
                            "[{}] Dropping late buffer (running {}, {} ms late)",
                            self.name,
                            running_time,
                            lateness / 1_000_000
                        );
                    } else {
                        tracing::debug!(
                            "[{}] Rendering late buffer (running {}, {} ms late)",
                            self.name,
                            running_time,
                            lateness / 1_000_000
                        );
                    }
                    self.context.bus.post(BusMessage::Qos(QosReport {
                        element: self.name.clone(),
                        running_time,
                        lateness,
                        dropped,
                    }));

                    return Ok(if dropped {
                        SyncOutcome::DropLate
                    } else {
                        SyncOutcome::Render
                    });
                }
            }
        }
    }

    fn unschedule(&self, st: &SinkState) {
        if let Some(id) = &st.clock_id {
            self.context.clock.unschedule(id);
        }
    }

    fn handle_eos(&self) -> FlowResult {
        let mut st = self.state.lock();
        if st.preroll == PrerollState::Flushing {
            return Err(FlowError::Flushing);
        }

        // EOS also completes a pending preroll.
        self.wait_preroll(&mut st, None)?;
        st.eos = true;
        drop(st);

        tracing::info!("[{}] End of stream", self.name);
        self.context.bus.post(BusMessage::Eos {
            element: self.name.clone(),
        });
        Ok(())
    }
}

impl PadHandler for SinkInner {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let (start, stop) = self.renderer.get_times(&buffer);

        let mut st = self.state.lock();
        if st.preroll == PrerollState::Flushing {
            return Err(FlowError::Flushing);
        }
        if st.eos {
            return Err(FlowError::Eos);
        }

        let running = match start {
            None => None,
            Some(start) => {
                let segment = Arc::clone(&st.segment);
                let converted = segment.clip(start, stop).and_then(|(start, stop)| {
                    let running_start = segment.to_running_time(start)?;
                    Some((running_start, stop.and_then(|s| segment.to_running_time(s))))
                });
                match converted {
                    Some(interval) => Some(interval),
                    None => {
                        st.stats.out_of_segment += 1;
                        tracing::trace!(
                            "[{}] Buffer [{} .. {}] outside {}, dropping",
                            self.name,
                            start,
                            display_opt(stop),
                            segment
                        );
                        return Ok(());
                    }
                }
            }
        };

        tracing::trace!(
            "[{}] Buffer pts={} running={}",
            self.name,
            display_opt(start),
            display_opt(running.map(|(start, _)| start))
        );

        match self.synchronize(&mut st, &buffer, running.map(|(start, _)| start))? {
            SyncOutcome::DropLate => return Ok(()),
            SyncOutcome::Render => {}
        }

        let renderer = &self.renderer;
        MutexGuard::unlocked(&mut st, || renderer.render(&buffer))?;

        st.stats.rendered += 1;
        if running.is_some() {
            st.position = running;
        }
        Ok(())
    }

    fn event(&self, _pad: &Pad, event: Event) -> FlowResult {
        match event {
            Event::Segment(segment) => {
                tracing::debug!("[{}] New {}", self.name, segment);
                self.state.lock().segment = segment;
                Ok(())
            }
            Event::FlushStart => {
                tracing::debug!("[{}] Flush start", self.name);
                let mut st = self.state.lock();
                st.preroll = PrerollState::Flushing;
                self.unschedule(&st);
                self.preroll_cond.notify_all();
                Ok(())
            }
            Event::FlushStop { reset_time } => {
                tracing::debug!("[{}] Flush stop (reset_time={})", self.name, reset_time);
                let mut st = self.state.lock();
                st.need_preroll();
                st.eos = false;
                if reset_time {
                    st.segment = Arc::new(Segment::default());
                    st.position = None;
                }
                Ok(())
            }
            Event::Eos => self.handle_eos(),
        }
    }
}

pub struct SyncSink {
    name: String,
    inner: Arc<SinkInner>,
    sink_pad: Arc<Pad>,
    state: Mutex<State>,
}

impl SyncSink {
    pub fn new(
        name: &str,
        config: SyncSinkConfig,
        renderer: Arc<dyn SinkRenderer>,
        context: &PipelineContext,
    ) -> Arc<SyncSink> {
        let inner = Arc::new(SinkInner {
            name: name.to_string(),
            config,
            renderer,
            context: context.clone(),
            state: Mutex::new(SinkState {
                preroll: PrerollState::Flushing,
                playing: false,
                preroll_delivered: false,
                eos: false,
                segment: Arc::new(Segment::default()),
                clock_id: None,
                position: None,
                stats: SinkStats::default(),
            }),
            preroll_cond: Condvar::new(),
        });
        let sink_pad = Pad::new_sink(&context.pads, name, "sink", inner.clone());

        Arc::new(SyncSink {
            name: name.to_string(),
            inner,
            sink_pad,
            state: Mutex::new(State::Stopped),
        })
    }

    pub fn config(&self) -> &SyncSinkConfig {
        &self.inner.config
    }

    pub fn preroll_state(&self) -> PrerollState {
        self.inner.state.lock().preroll
    }

    /// Running-time interval of the last rendered buffer.
    pub fn position(&self) -> Option<(ClockTime, Option<ClockTime>)> {
        self.inner.state.lock().position
    }

    pub fn stats(&self) -> SinkStats {
        self.inner.state.lock().stats
    }

    pub fn is_eos(&self) -> bool {
        self.inner.state.lock().eos
    }

    pub fn segment(&self) -> Arc<Segment> {
        Arc::clone(&self.inner.state.lock().segment)
    }
}

impl Element for SyncSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pad(&self) -> Option<&Arc<Pad>> {
        Some(&self.sink_pad)
    }

    fn state(&self) -> State {
        *self.state.lock()
    }

    fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess> {
        tracing::debug!("[{}] {:?}", self.name, transition);
        let mut success = StateChangeSuccess::Success;

        match transition {
            StateChange::ReadyToPaused => {
                {
                    let mut st = self.inner.state.lock();
                    st.need_preroll();
                    st.playing = false;
                    st.eos = false;
                    st.segment = Arc::new(Segment::default());
                    st.position = None;
                }
                self.sink_pad.set_active(true);
                success = StateChangeSuccess::Async;
            }
            StateChange::PausedToPlaying => {
                let mut st = self.inner.state.lock();
                st.playing = true;
                self.inner.preroll_cond.notify_all();
            }
            StateChange::PlayingToPaused => {
                let mut st = self.inner.state.lock();
                st.playing = false;
                if st.preroll != PrerollState::Flushing {
                    st.need_preroll();
                }
                self.inner.unschedule(&st);
                self.inner.preroll_cond.notify_all();
            }
            StateChange::PausedToReady => {
                {
                    let mut st = self.inner.state.lock();
                    st.preroll = PrerollState::Flushing;
                    st.playing = false;
                    self.inner.unschedule(&st);
                    self.inner.preroll_cond.notify_all();
                }
                self.sink_pad.set_active(false);
            }
            StateChange::StoppedToReady | StateChange::ReadyToStopped => {}
        }

        *self.state.lock() = transition.next();
        Ok(success)
    }
}
