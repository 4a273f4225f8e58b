// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Timestamp synchronization engine for push-based media pipelines.
//!
//! Buffers travel through linked [`Pad`]s as plain function calls, cross
//! thread boundaries at a [`Queue`], and are released by a [`SyncSink`] when
//! the pipeline [`Clock`] reaches `base_time + running_time`.

pub mod core;

pub use core::prelude;
pub use core::*;
