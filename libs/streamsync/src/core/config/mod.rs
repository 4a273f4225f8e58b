// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Element and pipeline configuration.

mod element_config;
pub(crate) mod millis;
mod pipeline_config;

pub use element_config::{
    BatcherConfig, LatePolicy, LeakyPolicy, QueueConfig, SyncSinkConfig, TestSourceConfig,
};
pub use pipeline_config::PipelineConfig;
