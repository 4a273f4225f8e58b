// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Time-domain mapping from stream time to running time.
//!
//! A [`Segment`] is an immutable snapshot. A seek or a time-domain reset
//! produces a new segment with a new [`generation`](Segment::generation);
//! consumers hold it as `Arc<Segment>` and swap the handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{Result, StreamError};
use crate::core::time::{display_opt, ClockTime};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Segment {
    start: ClockTime,
    stop: Option<ClockTime>,
    rate: f64,
    base: ClockTime,
    generation: u64,
}

impl Segment {
    /// Create a segment covering `[start, stop]` (unbounded when `stop` is
    /// `None`). `base` is the running time already accumulated by earlier
    /// segments.
    pub fn new(
        start: ClockTime,
        stop: Option<ClockTime>,
        rate: f64,
        base: ClockTime,
    ) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(StreamError::Configuration(format!(
                "segment rate must be finite and positive, got {rate}"
            )));
        }
        if let Some(stop) = stop {
            if start > stop {
                return Err(StreamError::Configuration(format!(
                    "segment start {start} is after stop {stop}"
                )));
            }
        }

        Ok(Self {
            start,
            stop,
            rate,
            base,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        })
    }

    #[inline]
    pub fn start(&self) -> ClockTime {
        self.start
    }

    #[inline]
    pub fn stop(&self) -> Option<ClockTime> {
        self.stop
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline]
    pub fn base(&self) -> ClockTime {
        self.base
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, position: ClockTime) -> bool {
        position >= self.start && self.stop.is_none_or(|stop| position <= stop)
    }

    /// Convert a stream position to running time.
    ///
    /// Returns `None` when `position` is outside `[start, stop]`. Callers clip
    /// first with [`clip`](Self::clip) when partial overlap should be kept.
    pub fn to_running_time(&self, position: ClockTime) -> Option<ClockTime> {
        if !self.contains(position) {
            return None;
        }

        let elapsed = position - self.start;
        let scaled = if self.rate == 1.0 {
            elapsed
        } else {
            let ns = (elapsed.nseconds() as f64 / self.rate).round();
            ClockTime::from_nseconds(ns.min(u64::MAX as f64) as u64)
        };
        Some(scaled + self.base)
    }

    /// Clip the interval `[start, stop]` against this segment.
    ///
    /// Returns `None` when the interval lies entirely outside the segment,
    /// otherwise the interval trimmed to the segment bounds.
    pub fn clip(
        &self,
        start: ClockTime,
        stop: Option<ClockTime>,
    ) -> Option<(ClockTime, Option<ClockTime>)> {
        // A buffer starting exactly at the stop of a non-empty segment has
        // nothing inside it.
        let past_stop = |seg_stop: ClockTime| {
            start > seg_stop || (start == seg_stop && seg_stop != self.start)
        };
        if self.stop.is_some_and(past_stop) {
            return None;
        }
        if stop.is_some_and(|stop| stop < self.start || (stop == self.start && start < stop)) {
            return None;
        }

        let clipped_start = start.max(self.start);
        let clipped_stop = match (stop, self.stop) {
            (Some(stop), Some(seg_stop)) => Some(stop.min(seg_stop)),
            (Some(stop), None) => Some(stop),
            (None, seg_stop) => seg_stop,
        };
        Some((clipped_start, clipped_stop))
    }
}

impl Default for Segment {
    /// `[0, unbounded)` at rate 1.0 with zero base.
    fn default() -> Self {
        Segment {
            start: ClockTime::ZERO,
            stop: None,
            rate: 1.0,
            base: ClockTime::ZERO,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment#{} [{} .. {}] rate={} base={}",
            self.generation,
            self.start,
            display_opt(self.stop),
            self.rate,
            self.base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> ClockTime {
        ClockTime::from_mseconds(v)
    }

    #[test]
    fn test_rejects_invalid_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = Segment::new(ClockTime::ZERO, None, rate, ClockTime::ZERO);
            assert!(
                matches!(result, Err(StreamError::Configuration(_))),
                "rate {rate} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_start_after_stop() {
        let result = Segment::new(ms(500), Some(ms(100)), 1.0, ClockTime::ZERO);
        assert!(result.is_err());
        assert!(Segment::new(ms(100), Some(ms(100)), 1.0, ClockTime::ZERO).is_ok());
    }

    #[test]
    fn test_running_time_equals_base_at_start() {
        let segment = Segment::new(ms(2000), Some(ms(5000)), 2.0, ms(700)).unwrap();
        assert_eq!(segment.to_running_time(ms(2000)), Some(ms(700)));
        assert_eq!(segment.to_running_time(ms(3000)), Some(ms(1200)));
        assert_eq!(segment.to_running_time(ms(5000)), Some(ms(2200)));
    }

    #[test]
    fn test_running_time_outside_segment_is_invalid() {
        let segment = Segment::new(ms(1000), Some(ms(2000)), 1.0, ClockTime::ZERO).unwrap();
        assert_eq!(segment.to_running_time(ms(999)), None);
        assert_eq!(segment.to_running_time(ms(2001)), None);

        let open = Segment::new(ms(1000), None, 1.0, ClockTime::ZERO).unwrap();
        assert_eq!(open.to_running_time(ms(999)), None);
        assert_eq!(
            open.to_running_time(ClockTime::from_seconds(3600)),
            Some(ClockTime::from_seconds(3599))
        );
    }

    #[test]
    fn test_running_time_is_monotonic() {
        let segment = Segment::new(ms(10), None, 0.75, ms(3)).unwrap();
        let mut previous = ClockTime::ZERO;
        for step in 0..500u64 {
            let position = ms(10) + ClockTime::from_useconds(step * 137);
            let running = segment.to_running_time(position).unwrap();
            assert!(running >= previous, "running time went backwards at step {step}");
            previous = running;
        }
    }

    #[test]
    fn test_clip_partial_overlap() {
        let segment = Segment::new(ms(1000), Some(ms(2000)), 1.0, ClockTime::ZERO).unwrap();

        assert_eq!(segment.clip(ms(900), Some(ms(1100))), Some((ms(1000), Some(ms(1100)))));
        assert_eq!(segment.clip(ms(1900), Some(ms(2100))), Some((ms(1900), Some(ms(2000)))));
        assert_eq!(segment.clip(ms(1500), None), Some((ms(1500), Some(ms(2000)))));
    }

    #[test]
    fn test_clip_outside() {
        let segment = Segment::new(ms(1000), Some(ms(2000)), 1.0, ClockTime::ZERO).unwrap();

        assert_eq!(segment.clip(ms(2100), Some(ms(2200))), None);
        assert_eq!(segment.clip(ms(500), Some(ms(900))), None);
        assert_eq!(segment.clip(ms(900), Some(ms(1000))), None);
        assert_eq!(segment.clip(ms(2000), Some(ms(2033))), None);
        assert_eq!(segment.clip(ms(2000), None), None);

        // An empty segment still accepts a buffer at its single point.
        let empty = Segment::new(ms(1000), Some(ms(1000)), 1.0, ClockTime::ZERO).unwrap();
        assert_eq!(empty.clip(ms(1000), Some(ms(1033))), Some((ms(1000), Some(ms(1000)))));
    }

    #[test]
    fn test_generations_are_unique() {
        let a = Segment::default();
        let b = Segment::new(a.start(), a.stop(), a.rate(), ms(40)).unwrap();
        assert_ne!(a.generation(), b.generation());
        assert_eq!(b.base(), ms(40));
    }
}
