// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Nanosecond timestamps.
//!
//! Every timestamp in the engine (buffer PTS/DTS, segment bounds, running
//! time, clock time) is a [`ClockTime`]. A timestamp that may be absent is an
//! `Option<ClockTime>`: `None` plays the role of the invalid sentinel and is
//! always distinct from [`ClockTime::ZERO`].

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::time::Duration;

/// Signed difference between two [`ClockTime`] values, in nanoseconds.
pub type ClockTimeDiff = i64;

/// Unsigned nanosecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const NSECOND: ClockTime = ClockTime(1);
    pub const USECOND: ClockTime = ClockTime(1_000);
    pub const MSECOND: ClockTime = ClockTime(1_000_000);
    pub const SECOND: ClockTime = ClockTime(1_000_000_000);
    pub const MAX: ClockTime = ClockTime(u64::MAX);

    #[inline]
    pub const fn from_nseconds(ns: u64) -> Self {
        ClockTime(ns)
    }

    #[inline]
    pub const fn from_useconds(us: u64) -> Self {
        ClockTime(us.saturating_mul(1_000))
    }

    #[inline]
    pub const fn from_mseconds(ms: u64) -> Self {
        ClockTime(ms.saturating_mul(1_000_000))
    }

    #[inline]
    pub const fn from_seconds(s: u64) -> Self {
        ClockTime(s.saturating_mul(1_000_000_000))
    }

    /// Negative and NaN inputs clamp to zero.
    pub fn from_seconds_f64(s: f64) -> Self {
        if s.is_nan() || s <= 0.0 {
            return ClockTime::ZERO;
        }
        ClockTime((s * 1e9).round().min(u64::MAX as f64) as u64)
    }

    #[inline]
    pub const fn nseconds(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn useconds(self) -> u64 {
        self.0 / 1_000
    }

    #[inline]
    pub const fn mseconds(self) -> u64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub const fn seconds(self) -> u64 {
        self.0 / 1_000_000_000
    }

    #[inline]
    pub fn seconds_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    #[inline]
    pub fn checked_add(self, rhs: ClockTime) -> Option<ClockTime> {
        self.0.checked_add(rhs.0).map(ClockTime)
    }

    #[inline]
    pub fn checked_sub(self, rhs: ClockTime) -> Option<ClockTime> {
        self.0.checked_sub(rhs.0).map(ClockTime)
    }

    #[inline]
    pub fn saturating_add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(rhs.0))
    }

    /// `self - other` as a signed value, saturating at the `i64` range.
    pub fn diff(self, other: ClockTime) -> ClockTimeDiff {
        let delta = self.0 as i128 - other.0 as i128;
        delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Offset by a signed amount, returning `None` if the result leaves the
    /// representable range.
    pub fn checked_add_signed(self, delta: ClockTimeDiff) -> Option<ClockTime> {
        self.0.checked_add_signed(delta).map(ClockTime)
    }

    #[inline]
    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        ClockTime(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<ClockTime> for Duration {
    fn from(t: ClockTime) -> Self {
        t.as_duration()
    }
}

impl Add for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: ClockTime) -> ClockTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for ClockTime {
    fn add_assign(&mut self, rhs: ClockTime) {
        *self = *self + rhs;
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;

    fn sub(self, rhs: ClockTime) -> ClockTime {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for ClockTime {
    fn sub_assign(&mut self, rhs: ClockTime) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for ClockTime {
    fn sum<I: Iterator<Item = ClockTime>>(iter: I) -> Self {
        iter.fold(ClockTime::ZERO, Add::add)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.0;
        let secs = ns / 1_000_000_000;
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            ns % 1_000_000_000
        )
    }
}

/// Format an optional timestamp, printing `none` for the invalid sentinel.
pub fn display_opt(t: Option<ClockTime>) -> String {
    match t {
        Some(t) => t.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_constructors() {
        assert_eq!(ClockTime::from_seconds(2).nseconds(), 2_000_000_000);
        assert_eq!(ClockTime::from_mseconds(33).nseconds(), 33_000_000);
        assert_eq!(ClockTime::from_useconds(5).nseconds(), 5_000);
        assert_eq!(ClockTime::from_seconds_f64(1.533), ClockTime::from_mseconds(1533));
        assert_eq!(ClockTime::from_seconds_f64(-1.0), ClockTime::ZERO);
    }

    #[test]
    fn test_saturating_arithmetic() {
        let a = ClockTime::from_seconds(1);
        let b = ClockTime::from_seconds(3);
        assert_eq!(a - b, ClockTime::ZERO);
        assert_eq!(b - a, ClockTime::from_seconds(2));
        assert_eq!(ClockTime::MAX + a, ClockTime::MAX);
        assert_eq!(a.checked_sub(b), None);
    }

    #[test]
    fn test_signed_diff() {
        let a = ClockTime::from_mseconds(1500);
        let b = ClockTime::from_mseconds(1000);
        assert_eq!(a.diff(b), 500_000_000);
        assert_eq!(b.diff(a), -500_000_000);
        assert_eq!(a.checked_add_signed(-500_000_000), Some(b));
        assert_eq!(b.checked_add_signed(-2_000_000_000), None);
    }

    #[test]
    fn test_display() {
        let t = ClockTime::from_seconds(3661) + ClockTime::from_mseconds(500);
        assert_eq!(t.to_string(), "1:01:01.500000000");
        assert_eq!(display_opt(None), "none");
    }

    #[test]
    fn test_duration_roundtrip() {
        let d = Duration::from_millis(250);
        let t = ClockTime::from(d);
        assert_eq!(t, ClockTime::from_mseconds(250));
        assert_eq!(Duration::from(t), d);
    }
}
