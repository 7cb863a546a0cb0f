//! History slot types shared by the history store and its readers.

use bytes::{Buf, BufMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::Quantity;

/// Slots in the intra-day ring (24 hours of half-hour buckets).
pub const DAY_SLOTS: usize = 48;
/// Slots in the week ring (one per day).
pub const WEEK_SLOTS: usize = 7;
/// Width of one intra-day bucket in seconds.
pub const BUCKET_SECONDS: i64 = 1800;
/// Width of one week-ring slot in seconds.
pub const DAY_SECONDS: i64 = 86_400;

/// One half-hour average.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HalfHourSlot {
    /// Mean of every sample taken during the bucket.
    pub value: f32,
    /// False for placeholder slots.
    pub valid: bool,
    /// Unix timestamp of the bucket boundary.
    pub timestamp: i64,
}

impl HalfHourSlot {
    /// Encoded size: f32 value, u8 valid, i64 timestamp.
    pub const ENCODED_LEN: usize = 4 + 1 + 8;

    /// An invalid slot stamped with `timestamp`.
    #[must_use]
    pub fn placeholder(timestamp: i64) -> Self {
        Self {
            value: 0.0,
            valid: false,
            timestamp,
        }
    }

    /// Append the little-endian encoding of this slot to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.value);
        buf.put_u8(u8::from(self.valid));
        buf.put_i64_le(self.timestamp);
    }

    /// Read one slot. The caller guarantees `ENCODED_LEN` bytes remain.
    pub fn decode(buf: &mut impl Buf) -> Self {
        Self {
            value: buf.get_f32_le(),
            valid: buf.get_u8() != 0,
            timestamp: buf.get_i64_le(),
        }
    }
}

/// One day's minimum and maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DayMinMaxSlot {
    pub min: f32,
    pub max: f32,
    pub valid: bool,
    /// Unix timestamp of the day boundary.
    pub timestamp: i64,
}

impl DayMinMaxSlot {
    /// Encoded size: f32 min, f32 max, u8 valid, i64 timestamp.
    pub const ENCODED_LEN: usize = 4 + 4 + 1 + 8;

    /// An invalid slot stamped with `timestamp`.
    #[must_use]
    pub fn placeholder(timestamp: i64) -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            valid: false,
            timestamp,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.min);
        buf.put_f32_le(self.max);
        buf.put_u8(u8::from(self.valid));
        buf.put_i64_le(self.timestamp);
    }

    pub fn decode(buf: &mut impl Buf) -> Self {
        Self {
            min: buf.get_f32_le(),
            max: buf.get_f32_le(),
            valid: buf.get_u8() != 0,
            timestamp: buf.get_i64_le(),
        }
    }
}

/// Lower bound reported when a ring has no valid slots.
pub const PLACEHOLDER_MIN: f32 = 0.0;
/// Upper bound reported when a ring has no valid slots.
pub const PLACEHOLDER_MAX: f32 = 4.0;

/// Read-side copy of one quantity's history with precomputed extrema.
///
/// When a ring has no valid slots its range is the placeholder
/// `[PLACEHOLDER_MIN, PLACEHOLDER_MAX]`, never an inverted one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryView {
    pub quantity: Quantity,
    /// Half-hour ring, oldest first.
    pub day: Vec<HalfHourSlot>,
    /// Week ring, oldest first.
    pub week: Vec<DayMinMaxSlot>,
    pub day_min: f32,
    pub day_max: f32,
    pub week_min: f32,
    pub week_max: f32,
}

impl HistoryView {
    /// Build a view over both rings and compute their extrema.
    #[must_use]
    pub fn new(quantity: Quantity, day: &[HalfHourSlot], week: &[DayMinMaxSlot]) -> Self {
        let (day_min, day_max) =
            extrema(day.iter().filter(|s| s.valid).map(|s| (s.value, s.value)));
        let (week_min, week_max) = extrema(week.iter().filter(|s| s.valid).map(|s| (s.min, s.max)));

        Self {
            quantity,
            day: day.to_vec(),
            week: week.to_vec(),
            day_min,
            day_max,
            week_min,
            week_max,
        }
    }
}

fn extrema(pairs: impl Iterator<Item = (f32, f32)>) -> (f32, f32) {
    let (min, max) = pairs.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (a, b)| {
        (lo.min(a), hi.max(b))
    });
    if max < min {
        (PLACEHOLDER_MIN, PLACEHOLDER_MAX)
    } else {
        (min, max)
    }
}
