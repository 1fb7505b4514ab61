//! Shared domain vocabulary: identifiers, HVAC modes, and time helpers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds in one minute.
pub const MS_PER_MINUTE: u64 = 60_000;
/// Milliseconds in one day.
pub const MS_PER_DAY: u64 = 86_400_000;
/// Number of hour-of-day buckets.
pub const HOURS_PER_DAY: u8 = 24;

/// Identifier of a room as known to the device directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

/// Identifier of a single motorized vent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VentId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl VentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for VentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operating mode of the forced-air system as inferred from sensor deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HvacMode {
    Idle,
    Heating,
    Cooling,
}

impl HvacMode {
    /// The two modes that drive a learning cycle.
    pub const ACTIVE: [HvacMode; 2] = [HvacMode::Heating, HvacMode::Cooling];

    pub fn is_active(self) -> bool {
        self != HvacMode::Idle
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvacMode::Idle => write!(f, "idle"),
            HvacMode::Heating => write!(f, "heating"),
            HvacMode::Cooling => write!(f, "cooling"),
        }
    }
}

/// Whole minutes (fractional) between two millisecond timestamps.
/// Returns `0.0` when `to` precedes `from`.
pub fn minutes_between(from_ms: u64, to_ms: u64) -> f64 {
    to_ms.saturating_sub(from_ms) as f64 / MS_PER_MINUTE as f64
}

/// Day index since the epoch for a millisecond timestamp.
pub fn epoch_day(at_ms: u64) -> u32 {
    (at_ms / MS_PER_DAY) as u32
}

/// Hour `steps` hours before `hour`, wrapping around midnight.
pub fn hour_before(hour: u8, steps: u8) -> u8 {
    let h = u16::from(hour % HOURS_PER_DAY) + u16::from(HOURS_PER_DAY)
        - u16::from(steps % HOURS_PER_DAY);
    (h % u16::from(HOURS_PER_DAY)) as u8
}
