//! Short-window room temperature trend tracking.
//!
//! Keeps the raw temperatures seen for each room over the last few minutes
//! and reports whether they moved in one direction for the whole window.
//! The mode detector reads the system-wide result as a fallback signal.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::model::{MS_PER_MINUTE, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone)]
pub struct TrendTracker {
    window_ms: u64,
    min_delta: f64,
    samples: BTreeMap<RoomId, VecDeque<(u64, f64)>>,
}

impl TrendTracker {
    pub fn new(window_minutes: u32, min_delta_c: f64) -> Self {
        Self {
            window_ms: u64::from(window_minutes) * MS_PER_MINUTE,
            min_delta: min_delta_c,
            samples: BTreeMap::new(),
        }
    }

    pub fn reconfigure(&mut self, window_minutes: u32, min_delta_c: f64) {
        self.window_ms = u64::from(window_minutes) * MS_PER_MINUTE;
        self.min_delta = min_delta_c;
    }

    /// Record a raw reading. Non-finite and out-of-order readings are ignored.
    pub fn push(&mut self, room: &RoomId, at_ms: u64, temp: f64) {
        if !temp.is_finite() {
            return;
        }
        let q = self.samples.entry(room.clone()).or_default();
        if q.back().is_some_and(|(t, _)| *t > at_ms) {
            return;
        }
        q.push_back((at_ms, temp));
        // Keep exactly one sample at or before the window start as anchor.
        let start = at_ms.saturating_sub(self.window_ms);
        while q.len() >= 2 && q[1].0 <= start {
            q.pop_front();
        }
    }

    /// Trend of one room over the full window.
    pub fn room_trend(&self, room: &RoomId) -> Trend {
        let Some(q) = self.samples.get(room) else {
            return Trend::Flat;
        };
        let (Some(&(first_at, first)), Some(&(last_at, last))) = (q.front(), q.back()) else {
            return Trend::Flat;
        };
        if last_at.saturating_sub(first_at) < self.window_ms {
            return Trend::Flat;
        }

        let delta = last - first;
        if delta.abs() < self.min_delta {
            return Trend::Flat;
        }
        // Sustained: no step against the direction larger than half the threshold.
        let slack = self.min_delta / 2.0;
        let sustained = q
            .iter()
            .zip(q.iter().skip(1))
            .all(|((_, a), (_, b))| (b - a) * delta.signum() >= -slack);
        match (sustained, delta > 0.0) {
            (true, true) => Trend::Rising,
            (true, false) => Trend::Falling,
            _ => Trend::Flat,
        }
    }

    /// Combined trend: rooms rising with none falling (or the reverse).
    pub fn system_trend(&self) -> Trend {
        let mut rising = false;
        let mut falling = false;
        for room in self.samples.keys() {
            match self.room_trend(room) {
                Trend::Rising => rising = true,
                Trend::Falling => falling = true,
                Trend::Flat => {}
            }
        }
        match (rising, falling) {
            (true, false) => Trend::Rising,
            (false, true) => Trend::Falling,
            _ => Trend::Flat,
        }
    }

    pub fn forget(&mut self, room: &RoomId) {
        self.samples.remove(room);
    }
}
