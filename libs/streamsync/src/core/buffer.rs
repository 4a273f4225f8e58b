// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Timestamped data units.
//!
//! A [`Buffer`] is owned by exactly one stage at a time: it is moved into
//! [`Pad::push`](crate::core::pad::Pad::push) and never cloned. Its timing
//! metadata is fixed at construction; a stage that needs different metadata
//! consumes the buffer and builds a new one.

use bytes::Bytes;

use crate::core::time::ClockTime;

bitflags::bitflags! {
    /// Per-buffer markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// One or more preceding buffers were dropped.
        const DISCONT = 1 << 0;
        /// The buffer carries no meaningful payload, only timing.
        const GAP = 1 << 1;
        /// The buffer cannot be decoded on its own.
        const DELTA_UNIT = 1 << 2;
        /// The buffer closes an aggregation unit (e.g. a batch).
        const MARKER = 1 << 3;
    }
}

impl Default for BufferFlags {
    fn default() -> Self {
        BufferFlags::empty()
    }
}

#[derive(Debug)]
pub struct Buffer {
    pts: Option<ClockTime>,
    dts: Option<ClockTime>,
    duration: Option<ClockTime>,
    offset: Option<u64>,
    flags: BufferFlags,
    payload: Bytes,
}

impl Buffer {
    /// Untimestamped buffer around `payload`.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            pts: None,
            dts: None,
            duration: None,
            offset: None,
            flags: BufferFlags::empty(),
            payload: payload.into(),
        }
    }

    pub fn builder(payload: impl Into<Bytes>) -> BufferBuilder {
        BufferBuilder {
            buffer: Buffer::new(payload),
        }
    }

    /// Shorthand for the common pts + duration case.
    pub fn with_timestamps(
        payload: impl Into<Bytes>,
        pts: ClockTime,
        duration: Option<ClockTime>,
    ) -> Self {
        let mut builder = Buffer::builder(payload).pts(pts);
        if let Some(duration) = duration {
            builder = builder.duration(duration);
        }
        builder.build()
    }

    #[inline]
    pub fn pts(&self) -> Option<ClockTime> {
        self.pts
    }

    #[inline]
    pub fn dts(&self) -> Option<ClockTime> {
        self.dts
    }

    #[inline]
    pub fn duration(&self) -> Option<ClockTime> {
        self.duration
    }

    #[inline]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    #[inline]
    pub fn has_flags(&self, flags: BufferFlags) -> bool {
        self.flags.contains(flags)
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// `pts + duration` when both are valid.
    pub fn end_time(&self) -> Option<ClockTime> {
        Some(self.pts? + self.duration?)
    }

    /// Consume this buffer and return one with `flags` replacing the old set.
    pub fn with_flags(self, flags: BufferFlags) -> Buffer {
        Buffer { flags, ..self }
    }

    /// Consume this buffer and return one with `flags` added.
    pub fn with_added_flags(self, flags: BufferFlags) -> Buffer {
        let flags = self.flags | flags;
        self.with_flags(flags)
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Builder for [`Buffer`]; the only way to set timing metadata.
#[derive(Debug)]
pub struct BufferBuilder {
    buffer: Buffer,
}

impl BufferBuilder {
    pub fn pts(mut self, pts: ClockTime) -> Self {
        self.buffer.pts = Some(pts);
        self
    }

    pub fn dts(mut self, dts: ClockTime) -> Self {
        self.buffer.dts = Some(dts);
        self
    }

    pub fn duration(mut self, duration: ClockTime) -> Self {
        self.buffer.duration = Some(duration);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.buffer.offset = Some(offset);
        self
    }

    pub fn flags(mut self, flags: BufferFlags) -> Self {
        self.buffer.flags = flags;
        self
    }

    pub fn build(self) -> Buffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_untimestamped() {
        let buffer = Buffer::new(vec![1u8, 2, 3]);
        assert_eq!(buffer.pts(), None);
        assert_eq!(buffer.dts(), None);
        assert_eq!(buffer.duration(), None);
        assert_eq!(buffer.end_time(), None);
        assert_eq!(buffer.size(), 3);
        assert!(buffer.flags().is_empty());
    }

    #[test]
    fn test_builder_sets_metadata() {
        let buffer = Buffer::builder(Bytes::from_static(b"frame"))
            .pts(ClockTime::from_mseconds(1500))
            .dts(ClockTime::from_mseconds(1466))
            .duration(ClockTime::from_mseconds(33))
            .offset(45)
            .flags(BufferFlags::DELTA_UNIT)
            .build();

        assert_eq!(buffer.pts(), Some(ClockTime::from_mseconds(1500)));
        assert_eq!(buffer.dts(), Some(ClockTime::from_mseconds(1466)));
        assert_eq!(buffer.end_time(), Some(ClockTime::from_mseconds(1533)));
        assert_eq!(buffer.offset(), Some(45));
        assert!(buffer.has_flags(BufferFlags::DELTA_UNIT));
    }

    #[test]
    fn test_with_added_flags_keeps_timing() {
        let buffer = Buffer::with_timestamps(
            vec![0u8; 4],
            ClockTime::from_seconds(1),
            Some(ClockTime::from_mseconds(40)),
        )
        .with_flags(BufferFlags::DELTA_UNIT);

        let marked = buffer.with_added_flags(BufferFlags::DISCONT);
        assert!(marked.has_flags(BufferFlags::DISCONT | BufferFlags::DELTA_UNIT));
        assert_eq!(marked.pts(), Some(ClockTime::from_seconds(1)));
        assert_eq!(marked.duration(), Some(ClockTime::from_mseconds(40)));
        assert_eq!(marked.size(), 4);
    }
}
