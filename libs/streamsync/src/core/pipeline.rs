// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline: element ownership, state walking and base-time assignment.
//!
//! State changes are driven one step at a time, downstream elements first, so
//! that a sink is ready to receive before its upstream starts producing and is
//! flushing before its upstream is torn down. Running time continues across
//! pauses: entering Playing sets `base_time = now - running_time_at_pause`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::bus::{Bus, BusMessage};
use crate::core::clocks::{Clock, SystemClock};
use crate::core::context::PipelineContext;
use crate::core::element::{Element, State, StateChange, StateChangeSuccess};
use crate::core::error::{Result, StreamError};
use crate::core::event::Event;
use crate::core::time::ClockTime;

struct Control {
    state: State,
    running_time_at_pause: ClockTime,
}

pub struct Pipeline {
    name: String,
    context: PipelineContext,
    elements: RwLock<Vec<Arc<dyn Element>>>,
    control: Mutex<Control>,
}

impl Pipeline {
    /// Create a pipeline driven by a [`SystemClock`].
    pub fn new(name: &str) -> Self {
        Self::with_clock(
            name,
            Arc::new(SystemClock::with_description(format!("{}-clock", name))),
        )
    }

    pub fn with_clock(name: &str, clock: Arc<dyn Clock>) -> Self {
        tracing::debug!("[{}] Using clock {}", name, clock.description());
        Self {
            name: name.to_string(),
            context: PipelineContext::new(clock),
            elements: RwLock::new(Vec::new()),
            control: Mutex::new(Control {
                state: State::Stopped,
                running_time_at_pause: ClockTime::ZERO,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handles passed to element constructors.
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.context.clock
    }

    pub fn bus(&self) -> &Bus {
        &self.context.bus
    }

    /// Take ownership of an element. Names must be unique.
    pub fn add<E: Element + 'static>(&self, element: Arc<E>) -> Result<()> {
        let element: Arc<dyn Element> = element;
        let mut elements = self.elements.write();
        if elements.iter().any(|e| e.name() == element.name()) {
            return Err(StreamError::Configuration(format!(
                "Element '{}' already exists in pipeline '{}'",
                element.name(),
                self.name
            )));
        }
        if element.state() != State::Stopped {
            return Err(StreamError::Configuration(format!(
                "Element '{}' must be Stopped when added (is {})",
                element.name(),
                element.state()
            )));
        }
        tracing::debug!("[{}] Added element {}", self.name, element.name());
        elements.push(element);
        Ok(())
    }

    pub fn element(&self, name: &str) -> Option<Arc<dyn Element>> {
        self.elements
            .read()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Link `src`'s output pad to `sink`'s input pad.
    pub fn link(&self, src: &str, sink: &str) -> Result<()> {
        let upstream = self
            .element(src)
            .ok_or_else(|| StreamError::NotFound(src.to_string()))?;
        let downstream = self
            .element(sink)
            .ok_or_else(|| StreamError::NotFound(sink.to_string()))?;

        let src_pad = upstream.src_pad().ok_or_else(|| {
            StreamError::Configuration(format!("Element '{}' has no src pad", src))
        })?;
        let sink_pad = downstream.sink_pad().ok_or_else(|| {
            StreamError::Configuration(format!("Element '{}' has no sink pad", sink))
        })?;

        self.context.pads.link(src_pad, sink_pad)?;
        tracing::debug!(
            "[{}] Linked {} -> {}",
            self.name,
            src_pad.full_name(),
            sink_pad.full_name()
        );
        Ok(())
    }

    /// Link each element to the next one.
    pub fn link_many(&self, names: &[&str]) -> Result<()> {
        for pair in names.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Overall state: the least active state of any element.
    pub fn state(&self) -> State {
        let elements = self.elements.read();
        elements
            .iter()
            .map(|e| e.state())
            .min()
            .unwrap_or_else(|| self.control.lock().state)
    }

    /// Clock time of running time zero for the current playing session.
    pub fn base_time(&self) -> Option<ClockTime> {
        self.context.base_time()
    }

    /// Running time of the pipeline. Advances with the clock while Playing
    /// and is frozen otherwise.
    pub fn running_time(&self) -> ClockTime {
        let control = self.control.lock();
        match (control.state, self.context.base_time()) {
            (State::Playing, Some(base)) => self.context.clock.now() - base,
            _ => control.running_time_at_pause,
        }
    }

    /// Walk every element to `target`, one adjacent state at a time.
    ///
    /// Returns `NoPreroll` if a live source took part, otherwise `Async` if a
    /// sink still has to preroll, otherwise `Success`.
    pub fn set_state(&self, target: State) -> Result<StateChangeSuccess> {
        let mut control = self.control.lock();
        let mut outcome = StateChangeSuccess::Success;

        while let Some(transition) = StateChange::next_step(control.state, target) {
            self.prepare_clock(&mut control, transition);

            for element in self.sorted_elements() {
                let old = element.state();
                let result = element.change_state(transition).map_err(|e| {
                    tracing::error!("[{}] {:?} failed: {}", element.name(), transition, e);
                    StreamError::StateChange {
                        element: element.name().to_string(),
                        transition,
                        reason: e.to_string(),
                    }
                })?;
                outcome = merge_outcome(outcome, result);
                self.context.bus.post(BusMessage::StateChanged {
                    element: element.name().to_string(),
                    old,
                    new: element.state(),
                });
            }

            let old = control.state;
            control.state = transition.next();
            tracing::info!("[{}] {} -> {}", self.name, old, control.state);
            self.context.bus.post(BusMessage::StateChanged {
                element: self.name.clone(),
                old,
                new: control.state,
            });
        }

        Ok(outcome)
    }

    /// Clock bookkeeping done before elements see `transition`.
    fn prepare_clock(&self, control: &mut Control, transition: StateChange) {
        let clock = &self.context.clock;
        match transition {
            StateChange::PausedToPlaying => {
                let base_time = clock.now() - control.running_time_at_pause;
                self.context.base_time.set(Some(base_time));
                tracing::info!(
                    "[{}] Base time {} (running time {})",
                    self.name,
                    base_time,
                    control.running_time_at_pause
                );
            }
            StateChange::PlayingToPaused => {
                if let Some(base) = self.context.base_time() {
                    control.running_time_at_pause = clock.now() - base;
                }
                tracing::debug!(
                    "[{}] Paused at running time {}",
                    self.name,
                    control.running_time_at_pause
                );
            }
            StateChange::PausedToReady => {
                control.running_time_at_pause = ClockTime::ZERO;
                self.context.base_time.set(None);
            }
            _ => {}
        }
    }

    /// Flush every source and everything downstream of it.
    ///
    /// With `reset_time`, running time restarts at zero.
    pub fn flush(&self, reset_time: bool) -> Result<()> {
        let sources: Vec<Arc<dyn Element>> = self
            .elements
            .read()
            .iter()
            .filter(|e| e.sink_pad().is_none())
            .cloned()
            .collect();

        tracing::debug!("[{}] Flush (reset_time={})", self.name, reset_time);
        for source in &sources {
            if let Err(e) = source.send_event(Event::FlushStart) {
                tracing::warn!("[{}] flush-start refused: {}", source.name(), e);
            }
        }

        if reset_time {
            let mut control = self.control.lock();
            control.running_time_at_pause = ClockTime::ZERO;
            if control.state == State::Playing {
                let base_time = self.context.clock.now();
                self.context.base_time.set(Some(base_time));
                tracing::info!("[{}] Base time reset to {}", self.name, base_time);
            }
        }

        for source in &sources {
            source.send_event(Event::FlushStop { reset_time })?;
        }
        Ok(())
    }

    /// Elements ordered downstream-first: every element comes after all the
    /// elements its src pad feeds.
    fn sorted_elements(&self) -> Vec<Arc<dyn Element>> {
        let elements = self.elements.read().clone();
        let downstream: HashMap<String, Option<String>> = elements
            .iter()
            .map(|e| {
                let peer = e
                    .src_pad()
                    .and_then(|pad| pad.peer())
                    .map(|peer| peer.parent().to_string());
                (e.name().to_string(), peer)
            })
            .collect();

        let mut placed: HashSet<String> = HashSet::new();
        let mut sorted = Vec::with_capacity(elements.len());
        let mut remaining = elements;
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|e| {
                match downstream.get(e.name()).and_then(Option::as_ref) {
                    Some(peer) => placed.contains(peer) || !downstream.contains_key(peer),
                    None => true,
                }
            });
            if ready.is_empty() {
                tracing::warn!("[{}] Link cycle, using insertion order", self.name);
                sorted.extend(blocked);
                break;
            }
            for element in ready {
                placed.insert(element.name().to_string());
                sorted.push(element);
            }
            remaining = blocked;
        }
        sorted
    }
}

fn merge_outcome(a: StateChangeSuccess, b: StateChangeSuccess) -> StateChangeSuccess {
    use StateChangeSuccess::*;
    match (a, b) {
        (NoPreroll, _) | (_, NoPreroll) => NoPreroll,
        (Async, _) | (_, Async) => Async,
        _ => Success,
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.control.lock().state != State::Stopped {
            if let Err(e) = self.set_state(State::Stopped) {
                tracing::warn!("[{}] Failed to stop on drop: {}", self.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::Buffer;
    use crate::core::clocks::TestClock;
    use crate::core::error::FlowResult;
    use crate::core::pad::{Pad, PadHandler};

    struct Discard;

    impl PadHandler for Discard {
        fn chain(&self, _pad: &Pad, _buffer: Buffer) -> FlowResult {
            Ok(())
        }
    }

    struct Stub {
        name: String,
        src: Option<Arc<Pad>>,
        sink: Option<Arc<Pad>>,
        state: Mutex<State>,
        success: StateChangeSuccess,
        fail_on: Option<StateChange>,
    }

    impl Stub {
        fn new(pipeline: &Pipeline, name: &str, src: bool, sink: bool) -> Stub {
            let pads = &pipeline.context().pads;
            Stub {
                name: name.to_string(),
                src: src.then(|| Pad::new_src(pads, name, "src")),
                sink: sink.then(|| Pad::new_sink(pads, name, "sink", Arc::new(Discard))),
                state: Mutex::new(State::Stopped),
                success: StateChangeSuccess::Success,
                fail_on: None,
            }
        }
    }

    impl Element for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn sink_pad(&self) -> Option<&Arc<Pad>> {
            self.sink.as_ref()
        }

        fn src_pad(&self) -> Option<&Arc<Pad>> {
            self.src.as_ref()
        }

        fn state(&self) -> State {
            *self.state.lock()
        }

        fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess> {
            if self.fail_on == Some(transition) {
                return Err(StreamError::Runtime("refused".into()));
            }
            *self.state.lock() = transition.next();
            Ok(self.success)
        }
    }

    fn chain(pipeline: &Pipeline) {
        // Added upstream-last to make sure ordering does not follow insertion.
        pipeline
            .add(Arc::new(Stub::new(pipeline, "src", true, false)))
            .unwrap();
        pipeline
            .add(Arc::new(Stub::new(pipeline, "mid", true, true)))
            .unwrap();
        pipeline
            .add(Arc::new(Stub::new(pipeline, "sink", false, true)))
            .unwrap();
        pipeline.link_many(&["src", "mid", "sink"]).unwrap();
    }

    fn state_changes(bus: &Bus) -> Vec<String> {
        bus.drain()
            .into_iter()
            .filter_map(|m| match m {
                BusMessage::StateChanged { element, new, .. } => {
                    Some(format!("{}:{}", element, new))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_add_rejects_duplicate_names() {
        let pipeline = Pipeline::with_clock("p", Arc::new(TestClock::new()));
        pipeline
            .add(Arc::new(Stub::new(&pipeline, "a", true, false)))
            .unwrap();
        let err = pipeline
            .add(Arc::new(Stub::new(&pipeline, "a", false, true)))
            .unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn test_link_errors() {
        let pipeline = Pipeline::with_clock("p", Arc::new(TestClock::new()));
        chain(&pipeline);
        assert!(matches!(
            pipeline.link("src", "missing"),
            Err(StreamError::NotFound(_))
        ));
        assert!(matches!(
            pipeline.link("sink", "mid"),
            Err(StreamError::Configuration(_))
        ));
        assert!(matches!(
            pipeline.link("src", "mid"),
            Err(StreamError::Link(_))
        ));
    }

    #[test]
    fn test_state_changes_run_downstream_first() {
        let pipeline = Pipeline::with_clock("p", Arc::new(TestClock::new()));
        chain(&pipeline);

        pipeline.set_state(State::Ready).unwrap();
        assert_eq!(
            state_changes(pipeline.bus()),
            vec!["sink:Ready", "mid:Ready", "src:Ready", "p:Ready"]
        );
        assert_eq!(pipeline.state(), State::Ready);

        pipeline.set_state(State::Stopped).unwrap();
        assert_eq!(
            state_changes(pipeline.bus()),
            vec!["sink:Stopped", "mid:Stopped", "src:Stopped", "p:Stopped"]
        );
    }

    #[test]
    fn test_failed_step_reports_element() {
        let pipeline = Pipeline::with_clock("p", Arc::new(TestClock::new()));
        let mut stub = Stub::new(&pipeline, "picky", false, true);
        stub.fail_on = Some(StateChange::ReadyToPaused);
        pipeline.add(Arc::new(stub)).unwrap();

        let err = pipeline.set_state(State::Playing).unwrap_err();
        match err {
            StreamError::StateChange {
                element,
                transition,
                ..
            } => {
                assert_eq!(element, "picky");
                assert_eq!(transition, StateChange::ReadyToPaused);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipeline.state(), State::Ready);
    }

    #[test]
    fn test_outcome_aggregation() {
        let pipeline = Pipeline::with_clock("p", Arc::new(TestClock::new()));
        let mut sink = Stub::new(&pipeline, "sink", false, true);
        sink.success = StateChangeSuccess::Async;
        pipeline.add(Arc::new(sink)).unwrap();
        assert_eq!(
            pipeline.set_state(State::Paused).unwrap(),
            StateChangeSuccess::Async
        );

        let mut live = Stub::new(&pipeline, "live", true, false);
        live.success = StateChangeSuccess::NoPreroll;
        assert_eq!(
            merge_outcome(StateChangeSuccess::Async, live.success),
            StateChangeSuccess::NoPreroll
        );
    }

    #[test]
    fn test_running_time_continues_across_pause() {
        let clock = Arc::new(TestClock::starting_at(ClockTime::from_seconds(100)));
        let pipeline = Pipeline::with_clock("p", clock.clone());
        chain(&pipeline);

        assert_eq!(pipeline.base_time(), None);
        pipeline.set_state(State::Playing).unwrap();
        assert_eq!(pipeline.base_time(), Some(ClockTime::from_seconds(100)));

        clock.advance(ClockTime::from_seconds(2));
        assert_eq!(pipeline.running_time(), ClockTime::from_seconds(2));

        pipeline.set_state(State::Paused).unwrap();
        clock.advance(ClockTime::from_seconds(5));
        assert_eq!(pipeline.running_time(), ClockTime::from_seconds(2));

        pipeline.set_state(State::Playing).unwrap();
        assert_eq!(pipeline.base_time(), Some(ClockTime::from_seconds(105)));
        assert_eq!(pipeline.running_time(), ClockTime::from_seconds(2));

        pipeline.set_state(State::Ready).unwrap();
        assert_eq!(pipeline.base_time(), None);
        assert_eq!(pipeline.running_time(), ClockTime::ZERO);
    }

    #[test]
    fn test_flush_with_reset_restarts_running_time() {
        let clock = Arc::new(TestClock::starting_at(ClockTime::from_seconds(100)));
        let pipeline = Pipeline::with_clock("p", clock.clone());
        chain(&pipeline);
        pipeline.set_state(State::Playing).unwrap();

        clock.advance(ClockTime::from_seconds(3));
        pipeline.flush(false).unwrap();
        assert_eq!(pipeline.running_time(), ClockTime::from_seconds(3));

        pipeline.flush(true).unwrap();
        assert_eq!(pipeline.base_time(), Some(ClockTime::from_seconds(103)));
        assert_eq!(pipeline.running_time(), ClockTime::ZERO);
    }
}
