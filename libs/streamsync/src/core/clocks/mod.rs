// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod clock_trait;
mod system_clock;
mod test_clock;

pub use clock_trait::{Clock, ClockId, ClockReturn, ClockWait};
pub use system_clock::SystemClock;
pub use test_clock::TestClock;
