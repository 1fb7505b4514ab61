//! Clock adapters.
//!
//! - [`SystemClock`] reads the host wall clock and applies a fixed UTC
//!   offset for the household's hour-of-day.
//! - [`ManualClock`] is advanced by hand for simulation and replay.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::app::ports::Clock;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Local hour-of-day for an epoch timestamp at `offset_minutes` from UTC.
pub fn hour_at_offset(at_ms: u64, offset_minutes: i32) -> u8 {
    let local = at_ms as i64 + i64::from(offset_minutes) * 60_000;
    (local.rem_euclid(MS_PER_DAY) / MS_PER_HOUR) as u8
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    utc_offset_minutes: i32,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { utc_offset_minutes }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as u64,
            Err(_) => {
                warn!("SystemClock: wall clock before epoch");
                0
            }
        }
    }

    fn hour_of_day(&self, at_ms: u64) -> u8 {
        hour_at_offset(at_ms, self.utc_offset_minutes)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
    utc_offset_minutes: i32,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
            utc_offset_minutes: 0,
        }
    }

    pub fn with_offset(mut self, utc_offset_minutes: i32) -> Self {
        self.utc_offset_minutes = utc_offset_minutes;
        self
    }

    pub fn advance_secs(&self, secs: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(secs * 1000));
    }

    pub fn set(&self, at_ms: u64) {
        self.now_ms.set(at_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn hour_of_day(&self, at_ms: u64) -> u8 {
        hour_at_offset(at_ms, self.utc_offset_minutes)
    }
}
