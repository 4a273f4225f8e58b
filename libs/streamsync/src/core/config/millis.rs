// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Serde helpers encoding [`ClockTime`] fields as (fractional) milliseconds.

use serde::{Deserialize, Deserializer, Serializer};

use crate::core::time::ClockTime;

fn to_ms(time: ClockTime) -> f64 {
    time.nseconds() as f64 / 1e6
}

fn from_ms<E: serde::de::Error>(ms: f64) -> Result<ClockTime, E> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(E::custom(format!(
            "expected a non-negative number of milliseconds, got {ms}"
        )));
    }
    Ok(ClockTime::from_seconds_f64(ms / 1e3))
}

pub fn serialize<S: Serializer>(time: &ClockTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(to_ms(*time))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ClockTime, D::Error> {
    from_ms(f64::deserialize(deserializer)?)
}

/// Same encoding for optional fields; `null` is `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        time: &Option<ClockTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_some(&to_ms(*time)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ClockTime>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(from_ms)
            .transpose()
    }
}
