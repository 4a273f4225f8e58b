// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Element configuration types.
//!
//! Each element copies its config at construction; changing a config value
//! afterwards has no effect on a running element.

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, StreamError};
use crate::core::time::ClockTime;

/// What a full queue does with more data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakyPolicy {
    /// Block the producer until space frees up.
    #[default]
    None,
    /// Drop the incoming buffer.
    Upstream,
    /// Evict the oldest queued buffers.
    Downstream,
}

/// Configuration for [`Queue`](crate::core::elements::Queue).
///
/// A zero count/bytes limit or a `None` time limit disables that limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_count: u32,
    pub max_bytes: u64,
    #[serde(rename = "max_time_ms", with = "super::millis::option")]
    pub max_time: Option<ClockTime>,
    pub leaky: LeakyPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_count: 200,
            max_bytes: 10 * 1024 * 1024,
            max_time: Some(ClockTime::SECOND),
            leaky: LeakyPolicy::None,
        }
    }
}

/// What a sink does with a buffer that is later than `max_lateness`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatePolicy {
    #[default]
    Drop,
    Render,
}

/// Configuration for [`SyncSink`](crate::core::elements::SyncSink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSinkConfig {
    /// Wait on the clock before rendering.
    pub sync: bool,
    /// Lateness above which a buffer is considered late. `None` is unbounded.
    #[serde(rename = "max_lateness_ms", with = "super::millis::option")]
    pub max_lateness: Option<ClockTime>,
    pub late_policy: LatePolicy,
}

impl Default for SyncSinkConfig {
    fn default() -> Self {
        Self {
            sync: true,
            max_lateness: Some(ClockTime::from_mseconds(20)),
            late_policy: LatePolicy::Drop,
        }
    }
}

/// Configuration for [`TestSource`](crate::core::elements::TestSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSourceConfig {
    /// Frames per second.
    pub fps: f64,
    /// Stop with EOS after this many buffers. `None` runs until stopped.
    pub num_buffers: Option<u64>,
    /// Pace buffers on the pipeline clock and produce only while Playing.
    pub is_live: bool,
    pub payload_size: usize,
}

impl Default for TestSourceConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            num_buffers: None,
            is_live: false,
            payload_size: 1024,
        }
    }
}

impl TestSourceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(StreamError::Configuration(format!(
                "fps must be finite and positive, got {}",
                self.fps
            )));
        }
        Ok(())
    }

    /// Duration of one frame.
    pub fn frame_duration(&self) -> ClockTime {
        ClockTime::from_seconds_f64(1.0 / self.fps)
    }

    /// Presentation time of frame `n`.
    pub fn pts_for(&self, n: u64) -> ClockTime {
        ClockTime::from_seconds_f64(n as f64 / self.fps)
    }
}

/// Configuration for [`Batcher`](crate::core::elements::Batcher).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Emit a batch once it spans at least this much stream time.
    #[serde(rename = "target_duration_ms", with = "super::millis")]
    pub target_duration: ClockTime,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            target_duration: ClockTime::from_seconds(2),
        }
    }
}
