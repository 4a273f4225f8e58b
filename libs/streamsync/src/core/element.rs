// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Run states and the element interface driven by the pipeline.

use std::fmt;
use std::sync::Arc;

use crate::core::error::{FlowResult, Result};
use crate::core::event::Event;
use crate::core::pad::Pad;

/// Run state of an element or of the whole pipeline. Ordered from least to
/// most active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    #[default]
    Stopped,
    Ready,
    Paused,
    Playing,
}

impl State {
    fn step_up(self) -> Option<State> {
        match self {
            State::Stopped => Some(State::Ready),
            State::Ready => Some(State::Paused),
            State::Paused => Some(State::Playing),
            State::Playing => None,
        }
    }

    fn step_down(self) -> Option<State> {
        match self {
            State::Stopped => None,
            State::Ready => Some(State::Stopped),
            State::Paused => Some(State::Ready),
            State::Playing => Some(State::Paused),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Stopped => "Stopped",
            State::Ready => "Ready",
            State::Paused => "Paused",
            State::Playing => "Playing",
        };
        f.write_str(s)
    }
}

/// A single-step transition between adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    StoppedToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToStopped,
}

impl StateChange {
    /// The transition from `from` to an adjacent `to`, if there is one.
    pub fn between(from: State, to: State) -> Option<StateChange> {
        use State::*;
        match (from, to) {
            (Stopped, Ready) => Some(StateChange::StoppedToReady),
            (Ready, Paused) => Some(StateChange::ReadyToPaused),
            (Paused, Playing) => Some(StateChange::PausedToPlaying),
            (Playing, Paused) => Some(StateChange::PlayingToPaused),
            (Paused, Ready) => Some(StateChange::PausedToReady),
            (Ready, Stopped) => Some(StateChange::ReadyToStopped),
            _ => None,
        }
    }

    /// The next step on the way from `current` to `target`.
    pub fn next_step(current: State, target: State) -> Option<StateChange> {
        let next = if target > current {
            current.step_up()?
        } else if target < current {
            current.step_down()?
        } else {
            return None;
        };
        StateChange::between(current, next)
    }

    pub fn current(&self) -> State {
        match self {
            StateChange::StoppedToReady => State::Stopped,
            StateChange::ReadyToPaused | StateChange::ReadyToStopped => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    pub fn next(&self) -> State {
        match self {
            StateChange::ReadyToStopped => State::Stopped,
            StateChange::StoppedToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }
}

/// How a successful state change completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeSuccess {
    /// Done.
    Success,
    /// Completes later; a sink posts `AsyncDone` once it has prerolled.
    Async,
    /// Live source: cannot produce data in Paused.
    NoPreroll,
}

/// A processing stage managed by a [`Pipeline`](crate::core::pipeline::Pipeline).
pub trait Element: Send + Sync {
    fn name(&self) -> &str;

    fn sink_pad(&self) -> Option<&Arc<Pad>> {
        None
    }

    fn src_pad(&self) -> Option<&Arc<Pad>> {
        None
    }

    fn state(&self) -> State;

    /// Perform one single-step transition.
    fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess>;

    /// Inject an event at this element, as the pipeline does for flushes.
    /// Elements without an upstream override this to push it downstream.
    fn send_event(&self, event: Event) -> FlowResult {
        match self.sink_pad() {
            Some(pad) => pad.send_event(event),
            None => Ok(()),
        }
    }
}
