// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Built-in elements.

mod batcher;
mod queue;
mod sync_sink;
mod test_source;

pub use batcher::{Batcher, BatcherStats};
pub use queue::{Queue, QueueLevels, QueueStats};
pub use sync_sink::{PrerollState, SinkRenderer, SinkStats, SyncSink};
pub use test_source::{SourceStats, TestSource};
