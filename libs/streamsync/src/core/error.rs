// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use crate::core::element::StateChange;

/// Result of handing a buffer or serialized event to the next stage.
///
/// `Ok(())` means the item was accepted. This includes items a stage chose to
/// drop on purpose (out-of-segment buffers, leaky queue drops, late buffers).
pub type FlowResult = std::result::Result<(), FlowError>;

/// Data-plane failures propagated back up a synchronous chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The pad has no peer, or the peer has been torn down.
    #[error("pad is not linked")]
    NotLinked,

    /// The receiving stage is flushing or shutting down.
    #[error("stage is flushing")]
    Flushing,

    /// The stream has ended for the receiving stage.
    #[error("end of stream")]
    Eos,

    /// Unrecoverable failure inside a stage.
    #[error("stream error: {0}")]
    Error(String),
}

impl FlowError {
    pub fn error(message: impl Into<String>) -> Self {
        FlowError::Error(message.into())
    }

    /// Whether the caller may retry once the stage stops flushing.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::Flushing)
    }
}

/// Failures when connecting two pads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("cannot link {src} to {sink}: wrong pad direction")]
    WrongDirection { src: String, sink: String },

    #[error("pad {0} is already linked")]
    AlreadyLinked(String),

    #[error("pad {0} is not registered in this pipeline")]
    NotRegistered(String),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("State change {transition:?} failed for {element}: {reason}")]
    StateChange {
        element: String,
        transition: StateChange,
        reason: String,
    },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
